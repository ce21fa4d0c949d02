use serde::{Deserialize, Serialize};

/// Where a purchase was made. The string forms are wire values (client
/// requests, stored rows, cache files) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IapSource {
    AppStore,
    PlayStore,
    Paddle,
    Manual,
}

impl IapSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IapSource::AppStore => "AppStore",
            IapSource::PlayStore => "PlayStore",
            IapSource::Paddle => "Paddle",
            IapSource::Manual => "Manual",
        }
    }

    /// Sources a client may submit to `/verify`. Manual purchases are
    /// granted out of band and have no vendor to ask.
    pub fn is_client_verifiable(&self) -> bool {
        !matches!(self, IapSource::Manual)
    }
}

impl std::str::FromStr for IapSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AppStore" => Ok(IapSource::AppStore),
            "PlayStore" => Ok(IapSource::PlayStore),
            "Paddle" => Ok(IapSource::Paddle),
            "Manual" => Ok(IapSource::Manual),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for IapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
