pub mod device_client;
pub mod json_client;
