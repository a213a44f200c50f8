//! Core of the glowlink lighting companion: the self-update delivery pipeline
//! and the one-shot lighting server connectivity probe.

pub mod device;
pub mod dispatch;
pub mod downloader;
pub mod probe;
pub mod progress;
pub mod types;
pub mod update;
