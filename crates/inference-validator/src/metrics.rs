//! Metrics recorded by the validator

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

pub const ROUND_DURATION_SECONDS: &str = "inference_validator_round_duration_seconds";
pub const MINER_OUTCOMES_TOTAL: &str = "inference_validator_miner_outcomes_total";
pub const ROUNDS_TOTAL: &str = "inference_validator_rounds_total";

/// Register metric descriptions with the installed recorder
pub fn describe() {
    describe_histogram!(ROUND_DURATION_SECONDS, "Wall time of one orchestration round");
    describe_counter!(MINER_OUTCOMES_TOTAL, "Per-miner round outcomes");
    describe_counter!(ROUNDS_TOTAL, "Orchestration rounds by result");
}

pub fn record_round(duration: Duration, result: &'static str) {
    histogram!(ROUND_DURATION_SECONDS).record(duration.as_secs_f64());
    counter!(ROUNDS_TOTAL, "result" => result).increment(1);
}

pub fn record_miner_outcome(outcome: &'static str) {
    counter!(MINER_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}
