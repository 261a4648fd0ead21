pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod layout;
pub mod loader;
pub mod maps;
pub mod options;
pub mod orchestrator;
pub mod probe;
pub mod router;

pub use error::{KitError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
