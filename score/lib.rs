#![deny(unused_variables)]
#![deny(dead_code)]
pub mod bed;
pub mod catalog;
pub mod config;
pub mod decode;
pub mod error;
pub mod kernel;
pub mod locate;
pub mod pipeline;
pub mod qc;
pub mod registry;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod types;
pub mod weights;
pub mod shared {
    pub use super::shared_files as files;
}

pub use error::{GenotypeError, Result};
