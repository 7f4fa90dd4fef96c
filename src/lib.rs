pub mod config;
pub mod error;
pub mod document;
pub mod intake;
pub mod completion;
pub mod persistence;
pub mod processor;
pub mod session;
pub mod server;

pub use config::Config;
pub use document::{BatchId, Document, ItemStatus, ModelId, RunState};
pub use error::{DistillError, Result};
pub use processor::{BatchProcessor, RunReport};
pub use session::Session;
