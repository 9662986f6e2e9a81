pub mod analytics;
pub mod campaign;
pub mod config;
pub mod limits;
pub mod logging;

pub use campaign::{Campaign, CampaignError};
pub use config::CampaignConfig;
