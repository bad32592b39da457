pub mod config;
pub mod provider;
pub mod repository;
pub mod signature;

pub use config::*;
pub use provider::*;
pub use repository::*;
pub use signature::*;
