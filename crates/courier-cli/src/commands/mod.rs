pub mod check_config;
pub mod demo;
