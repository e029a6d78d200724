mod app_config;

pub use app_config::{AppConfig, DB_PATH_ENV};
