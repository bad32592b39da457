pub mod checkout;
pub mod ledger;

pub use checkout::*;
pub use ledger::*;
