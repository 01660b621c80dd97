//! Metrics recorded by the managing service

use metrics::{counter, describe_counter};

pub const CONSUME_TOTAL: &str = "inference_managing_consume_total";
pub const SCORE_UPDATES_TOTAL: &str = "inference_managing_score_updates_total";
pub const ALLOTMENT_REFRESH_TOTAL: &str = "inference_managing_allotment_refresh_total";

/// Outcome label of a single quota consumption
#[derive(Debug, Clone, Copy)]
pub enum ConsumeOutcome {
    Accepted,
    Denied,
    Failed,
}

impl ConsumeOutcome {
    fn label(self) -> &'static str {
        match self {
            ConsumeOutcome::Accepted => "accepted",
            ConsumeOutcome::Denied => "denied",
            ConsumeOutcome::Failed => "failed",
        }
    }
}

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_counter!(CONSUME_TOTAL, "Quota consumption attempts by outcome");
    describe_counter!(SCORE_UPDATES_TOTAL, "Miner scores recorded");
    describe_counter!(
        ALLOTMENT_REFRESH_TOTAL,
        "Validator allotment recomputations by outcome"
    );
}

pub fn record_consume(outcome: ConsumeOutcome) {
    counter!(CONSUME_TOTAL, "outcome" => outcome.label()).increment(1);
}

pub fn record_score_updates(count: usize) {
    counter!(SCORE_UPDATES_TOTAL).increment(count as u64);
}

pub fn record_allotment_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(ALLOTMENT_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}
