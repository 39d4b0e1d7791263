pub mod application;
pub mod cli;
pub mod domain;
pub mod io;
pub mod storage;
pub mod telemetry;

pub use application::{EngineConfig, LedgerEngine, LedgerError};
pub use domain::*;
pub use storage::{LedgerStore, MemoryStore, SqliteStore, StoreConfig, UnitOfWork};
