pub mod headers;
pub mod health;
pub mod static_config;
