//! TileForge compiler facade: PGO controller, stage pipeline and the kernel
//! compile session.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod timing;

#[cfg(feature = "cli")]
pub use cli::*;
pub use config::*;
pub use controller::*;
pub use error::*;
pub use pipeline::*;
pub use report::*;
pub use session::*;
pub use timing::*;
