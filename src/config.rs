use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// File-backed incremental cache of Purchase rows (reverify/report tooling)
    pub purchase_cache_path: String,
    /// File-backed incremental cache of PurchaseUser rows
    pub purchase_user_cache_path: String,
    /// Browser origins allowed on the CORS-gated endpoints
    pub allowed_origins: Vec<String>,
    /// Purchase ids the reverify sweep skips (known-bad vendor records)
    pub ignored_purchase_ids: Vec<String>,
    /// User ids the reverify sweep skips
    pub ignored_user_ids: Vec<String>,
    /// Paddle user ids the reverify sweep skips
    pub ignored_paddle_user_ids: Vec<String>,
}

fn env_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://127.0.0.1:8080",
    "http://localhost:8080",
    "https://localhost:3000",
];

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8088);

        let allowed_origins = match env::var("ALLOWED_ORIGINS") {
            Ok(v) => env_list(&v),
            Err(_) => DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "subsync.db".to_string()),
            purchase_cache_path: env::var("PURCHASE_CACHE_PATH")
                .unwrap_or_else(|_| "purchases.json".to_string()),
            purchase_user_cache_path: env::var("PURCHASE_USER_CACHE_PATH")
                .unwrap_or_else(|_| "purchase_users.json".to_string()),
            allowed_origins,
            ignored_purchase_ids: env::var("IGNORED_PURCHASE_IDS")
                .map(|v| env_list(&v))
                .unwrap_or_default(),
            ignored_user_ids: env::var("IGNORED_USER_IDS")
                .map(|v| env_list(&v))
                .unwrap_or_default(),
            ignored_paddle_user_ids: env::var("IGNORED_PADDLE_USER_IDS")
                .map(|v| env_list(&v))
                .unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
