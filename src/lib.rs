pub mod config;
pub mod engine;
pub mod feed;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod tenant;
pub mod wal;
