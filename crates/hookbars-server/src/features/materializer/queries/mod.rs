//! Materializer queries

pub mod status;

pub use status::MaterializerStatus;
