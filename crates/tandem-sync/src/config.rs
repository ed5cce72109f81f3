use std::str::FromStr;
use std::time::Duration;

/// What happens to an optimistic message whose send request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Remove the optimistic entry from the store.
    #[default]
    Discard,
    /// Keep the entry with status `failed` so the user can retry it.
    MarkFailed,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "mark-failed" | "mark_failed" | "keep" => Ok(Self::MarkFailed),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a `typing-start` keeps a peer marked as typing without a refresh.
    pub typing_ttl: Duration,
    /// Minimum gap between two outgoing `typing-start` signals while composing.
    pub typing_reemit_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// Page size for the history fetch issued on join.
    pub history_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(1),
            typing_reemit_interval: Duration::from_secs(1),
            failure_policy: FailurePolicy::Discard,
            history_limit: 50,
        }
    }
}
