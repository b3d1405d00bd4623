//! Infrastructure layer: data store, publishing, CDC relay, config, external services.

pub mod cdc;
pub mod config;
pub mod integrations;
pub mod publish;
pub mod store;
