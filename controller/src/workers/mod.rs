//! Background workers

pub mod janitor;
pub mod pool;
pub mod queue;
