//! Facemask Library
//!
//! Self-destructing image drop: uploads are checked against an image
//! allow-list, every detected face is irreversibly blurred, and the result
//! can be downloaded exactly once before it is deleted.
//!
//! # Features
//!
//! - **Content Sniffing**: Formats are detected from the bytes, never the filename
//! - **Face Blurring**: Haar cascade detection with one or more models
//! - **One-Time Retrieval**: A stored image is deleted as it is served
//! - **No Index**: Files are found by a sharded directory prefix scan
//!
//! # Example
//!
//! ```no_run
//! use facemask::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod anonymize;
pub mod config;
pub mod format;
pub mod identifier;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod transfer;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::Pipeline;
pub use server::Server;
pub use transfer::TransferResult;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
