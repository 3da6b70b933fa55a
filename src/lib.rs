pub mod assembler;
pub mod auth;
pub mod cache;
pub mod comments;
pub mod config;
pub mod counters;
pub mod error;
pub mod models;
pub mod pagination;
pub mod posts;
pub mod repo;
pub mod routes;
pub mod storage;
pub mod users;
pub mod validation;
pub mod visibility;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use visibility::{ViewerContext, ViewerIdentity};
