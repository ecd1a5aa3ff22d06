pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod pagination;
pub mod transport;
pub mod validation;
pub mod verify;

pub use engine::{Submission, SyncEngine};
pub use error::SyncError;
