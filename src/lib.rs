//! Multi-file relationship analysis for learning goals, with every generated
//! artifact traceable back to the code lines that justify it.

pub mod config;
pub mod core;
pub mod error;

pub use config::Config;
pub use error::{Result, TrailError};
