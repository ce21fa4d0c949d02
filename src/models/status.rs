use serde::{Deserialize, Serialize};

/// Normalized subscription lifecycle status across all vendors.
///
/// The string forms are stored in the database and in cache files; `Grace`
/// serializes as `GracePeriod` for historical compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseStatus {
    Active,
    NoRenew,
    #[serde(rename = "GracePeriod")]
    Grace,
    OnHold,
    Paused,
    Expired,
    Unknown,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Active => "Active",
            PurchaseStatus::NoRenew => "NoRenew",
            PurchaseStatus::Grace => "GracePeriod",
            PurchaseStatus::OnHold => "OnHold",
            PurchaseStatus::Paused => "Paused",
            PurchaseStatus::Expired => "Expired",
            PurchaseStatus::Unknown => "Unknown",
        }
    }

    /// Lower is better. Used to pick one purchase per product when a user
    /// holds several historical purchases of the same product.
    pub fn priority(&self) -> u8 {
        match self {
            PurchaseStatus::Active => 0,
            PurchaseStatus::NoRenew => 1,
            PurchaseStatus::Grace => 2,
            PurchaseStatus::OnHold => 3,
            PurchaseStatus::Paused => 4,
            PurchaseStatus::Expired => 5,
            PurchaseStatus::Unknown => 6,
        }
    }

    /// Statuses that imply access has not ended yet. Used by the soft
    /// status-vs-date consistency check.
    pub fn implies_access(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Active | PurchaseStatus::NoRenew | PurchaseStatus::Grace
        )
    }
}

impl std::str::FromStr for PurchaseStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(PurchaseStatus::Active),
            "NoRenew" => Ok(PurchaseStatus::NoRenew),
            "GracePeriod" => Ok(PurchaseStatus::Grace),
            "OnHold" => Ok(PurchaseStatus::OnHold),
            "Paused" => Ok(PurchaseStatus::Paused),
            "Expired" => Ok(PurchaseStatus::Expired),
            "Unknown" => Ok(PurchaseStatus::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
