//! External collaborators of the TileForge PGO pipeline: process execution,
//! artifact handles, kernel compilation, measurement harnesses and device
//! leases.

pub mod artifact;
pub mod command;
pub mod compiler;
pub mod device;
pub mod external;
pub mod harness;

pub use artifact::*;
pub use command::*;
pub use compiler::*;
pub use device::*;
pub use external::*;
pub use harness::*;
