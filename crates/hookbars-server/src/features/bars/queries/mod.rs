//! Bar queries

pub mod list_bars;

pub use list_bars::{ListBarsQuery, ListBarsResponse, PageCursor};
