#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunking;
pub mod config;
pub mod data_processor;
pub mod error;
pub mod query;
pub mod scan;
pub mod schema;
pub mod similarity;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
