pub mod config;
pub mod hash;
pub mod signature;
pub mod trackinfo;

pub use config::{Config, Paths};
