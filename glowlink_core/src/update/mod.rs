pub mod artifact;
pub mod download_service;
pub mod installer;
pub mod orchestrator;
