//! Data engineering copilot: a retrieval-gated assistant that answers
//! questions from indexed Spark, dbt and Airflow documentation.

pub mod agent;
pub mod api;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod history;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
pub use service::CopilotService;
