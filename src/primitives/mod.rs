// Shared primitives and error types
pub mod error;
pub mod primitives;

pub use error::*;
pub use primitives::*;
