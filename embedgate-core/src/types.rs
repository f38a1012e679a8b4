//! Shared request/response types for the admission core.

use serde::{Deserialize, Serialize};

/// Text items submitted for embedding in one request
pub type Payload = Vec<String>;

/// One embedding vector produced by the inference engine
pub type Embedding = Vec<f32>;

/// Client identifier used for per-client rate limiting
pub type ClientId = String;

/// Priority class of a request.
///
/// Ordering is meaningful: `Low < Normal < High < Admin`. Shedding and
/// dequeue order compare variants directly instead of raw numbers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Admin,
}

impl Priority {
    /// All priorities, highest first (dequeue order)
    pub const DESCENDING: [Priority; 4] =
        [Priority::Admin, Priority::High, Priority::Normal, Priority::Low];

    /// Index of this priority's tier in per-priority arrays
    pub fn tier(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Admin => 3,
        }
    }

    /// Whether this priority may use the headroom reserved above the shed threshold
    pub fn bypasses_shedding(self) -> bool {
        self >= Priority::High
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "admin" => Ok(Priority::Admin),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Result delivered to a caller once its batch completes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutput {
    /// One embedding per submitted item, in submission order
    pub embeddings: Vec<Embedding>,
    /// Identifier of the batch that carried this request
    pub batch_id: u64,
    /// Number of requests that shared the batch
    pub batch_size: usize,
}
