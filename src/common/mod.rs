//! Common Utilities

pub mod error;

pub use error::{CanopyError, Result};
