// Application layer: the ledger engine and the unit-of-work coordinator
// it runs every mutation through.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;

pub use config::*;
pub use coordinator::*;
pub use engine::*;
pub use error::*;
