pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod fees;
pub mod identity;
pub mod limits;
pub mod model;
pub mod observability;
pub mod payment;
pub mod reconciler;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
