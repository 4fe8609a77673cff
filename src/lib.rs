pub mod config;
pub mod consumer;
pub mod core;
pub mod error;
pub mod http_server;
pub mod monitoring;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use config::{Config, StoreBackend};
pub use core::EventProcessingPipeline;
pub use error::{Result, SyncError};
pub use http_server::HttpServer;
