pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconcile;
pub mod wal;
