//! Application services layer.

pub mod error;
pub mod serve;
pub mod source;
