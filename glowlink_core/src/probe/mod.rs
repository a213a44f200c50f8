pub mod connectivity_probe;
pub mod palette;
