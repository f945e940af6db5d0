pub mod config;
pub mod error;
pub mod paths;

pub use config::{
    BrowserConfig, Config, EnvConfig, HarvestConfig, SiteConfig, StoreConfig, Timings,
};
pub use error::{Error, Result};
pub use paths::Paths;
