pub mod http_download_service;
