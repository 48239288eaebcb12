//! Deployment orchestration

pub mod controller;
pub mod executor;
pub mod fsm;
pub mod manifest;
pub mod ports;
pub mod reconciler;
