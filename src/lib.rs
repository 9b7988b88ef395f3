// starboard library root.
// Rolling repository star rankings with tiered caching and metadata enrichment.

pub mod app;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod rank;
pub mod retry;
pub mod server;
pub mod service;
pub mod upstream;

pub use app::App;
pub use config::Config;
pub use error::{Result, StarboardError};
