pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod util;
pub mod vendors;
