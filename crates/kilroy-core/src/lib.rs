pub mod catalog;
pub mod config;
pub mod error;
pub mod estimate;
pub mod generate;
pub mod hybe;
pub mod hyper;
pub mod io;
pub mod paths;
pub mod runner;
pub mod xml;

pub use error::{KilroyError, Result};
