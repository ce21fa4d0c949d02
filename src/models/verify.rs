use serde::{Deserialize, Serialize};

/// Outcome class of one verification attempt.
///
/// The INVALID/UNKNOWN distinction is load-bearing: INVALID is a definitive
/// vendor rejection (never persist the payload), UNKNOWN is a transient
/// failure (keep stored state, retry later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStatus {
    #[serde(rename = "VALID")]
    Valid,
    #[serde(rename = "INVALID")]
    Invalid,
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "ERROR")]
    Error,
}

impl VerifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStatus::Valid => "VALID",
            VerifyStatus::Invalid => "INVALID",
            VerifyStatus::Unknown => "UNKNOWN",
            VerifyStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
