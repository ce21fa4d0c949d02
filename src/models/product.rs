use serde::{Deserialize, Serialize};

/// App-scoped SKU identifiers. Each product belongs to exactly one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductId {
    #[serde(rename = "com.lumenboard.supporter")]
    LumenboardSupporter,
    #[serde(rename = "com.quillpad.supporter")]
    QuillpadSupporter,
}

/// Client applications served by this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppId {
    #[serde(rename = "com.lumenboard")]
    Lumenboard,
    #[serde(rename = "com.quillpad")]
    Quillpad,
}

/// Paddle plan ids sold for the Lumenboard supporter product (live + sandbox).
const PADDLE_PLANS_LUMENBOARD: &[u64] = &[58231, 812406];
const PADDLE_PLANS_QUILLPAD: &[u64] = &[];

impl ProductId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductId::LumenboardSupporter => "com.lumenboard.supporter",
            ProductId::QuillpadSupporter => "com.quillpad.supporter",
        }
    }

    pub fn app_id(&self) -> AppId {
        match self {
            ProductId::LumenboardSupporter => AppId::Lumenboard,
            ProductId::QuillpadSupporter => AppId::Quillpad,
        }
    }

    /// Resolve a Paddle numeric plan/product id to a product.
    pub fn from_paddle_plan(plan_id: u64) -> Option<Self> {
        if PADDLE_PLANS_LUMENBOARD.contains(&plan_id) {
            return Some(ProductId::LumenboardSupporter);
        }
        if PADDLE_PLANS_QUILLPAD.contains(&plan_id) {
            return Some(ProductId::QuillpadSupporter);
        }
        None
    }
}

impl AppId {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppId::Lumenboard => "com.lumenboard",
            AppId::Quillpad => "com.quillpad",
        }
    }
}

impl std::str::FromStr for ProductId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "com.lumenboard.supporter" => Ok(ProductId::LumenboardSupporter),
            "com.quillpad.supporter" => Ok(ProductId::QuillpadSupporter),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for AppId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "com.lumenboard" => Ok(AppId::Lumenboard),
            "com.quillpad" => Ok(AppId::Quillpad),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
