pub mod account;
pub mod order;
pub mod plan;

pub use account::*;
pub use order::*;
pub use plan::*;
