//! Core constants, error types and collaborator traits.
//!
//! Nothing in this module performs I/O.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
