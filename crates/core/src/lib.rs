pub mod archive;
pub mod backup;
pub mod collector;
pub mod error;
pub mod installer;
pub mod python;
pub mod volume;

pub use error::{DuffelError, Result};
