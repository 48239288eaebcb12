pub mod client;
pub mod notifier;
pub mod registry;
