//! HTTP surface of the background worker service.

pub mod app;
