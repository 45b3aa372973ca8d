pub mod persistence;
pub mod types;

pub use persistence::{load_config, save_config};
pub use types::{CollectorConfig, CollectorSettings, IpmiSettings};
