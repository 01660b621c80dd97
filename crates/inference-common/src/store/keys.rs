//! Key namespace shared by every process that touches the state store

/// Membership snapshot written by the sidecar for one network
pub fn node_infos(netuid: u16) -> String {
    format!("subtensor:{netuid}:node_infos")
}

/// Per-validator allotment map for the current refresh interval
pub const VALIDATOR_ALLOTMENTS: &str = "rate_limits:validators";

/// Requests a validator has spent against a miner in one epoch
pub fn consumed(epoch: i64, validator: &str, miner: &str) -> String {
    format!("rate_limits:consumed:{epoch}:{validator}:{miner}")
}

pub const SCORE_HISTORY_PREFIX: &str = "scores:history:";
pub const SCORE_AVERAGE_PREFIX: &str = "scores:average:";

pub fn score_history(miner: &str) -> String {
    format!("{SCORE_HISTORY_PREFIX}{miner}")
}

pub fn score_average(miner: &str) -> String {
    format!("{SCORE_AVERAGE_PREFIX}{miner}")
}

/// Score-tracking window of one miner under a configurable prefix
pub fn score_window(prefix: &str, miner: &str) -> String {
    format!("{prefix}{miner}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(node_infos(47), "subtensor:47:node_infos");
        assert_eq!(consumed(12, "val", "min"), "rate_limits:consumed:12:val:min");
        assert_eq!(score_history("abc"), "scores:history:abc");
        assert_eq!(score_average("abc"), "scores:average:abc");
        assert_eq!(score_window("score_tracking:", "abc"), "score_tracking:abc");
    }

    #[test]
    fn test_average_prefix_strips_to_identity() {
        let key = score_average("miner-1");
        assert_eq!(key.strip_prefix(SCORE_AVERAGE_PREFIX), Some("miner-1"));
    }
}
