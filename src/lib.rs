pub mod cli;
pub mod collection;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod manifest;
mod metrics;
pub mod pipeline;
mod server;
pub mod source;
pub mod store;
pub mod types;
pub mod utils;
pub mod writer;

pub use config::Opts;
pub use error::IndexError;
pub use manifest::RunManifest;
pub use pipeline::{Pipeline, PipelineBuilder};
