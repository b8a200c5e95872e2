pub mod headers;
pub mod static_config;
