//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Numeric helpers for clamping, tolerant comparison and data texture layout

mod error;
mod math;

pub use error::*;
pub use math::*;
