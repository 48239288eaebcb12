//! Seed Controller Library
//!
//! Reconciles model-serving deployments onto Kubernetes clusters.

pub mod app;
pub mod cluster;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod i18n;
pub mod logs;
pub mod models;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
