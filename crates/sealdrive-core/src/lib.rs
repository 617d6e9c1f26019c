pub mod config;

pub use config::SealdriveConfig;
