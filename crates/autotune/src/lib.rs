//! Search-log ranking and persisted tiling decisions for TileForge PGO.

pub mod decision;
pub mod search_log;

pub use decision::*;
pub use search_log::*;
