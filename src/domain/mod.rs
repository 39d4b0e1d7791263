mod account;
mod integrity;
mod ledger;
mod money;
mod transaction;
mod validation;

pub use account::*;
pub use integrity::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use validation::*;
