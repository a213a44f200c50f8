pub mod observer;
pub mod notifier;
pub mod snapshot;
