pub mod config;
pub mod error;
pub mod targeting;
pub mod types;
pub mod variants;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
pub use variants::{VariantDecision, VariantSelector};
