//! Campaign management: the campaign store, schedule lifecycle, activation
//! and serve-time evaluation.

pub mod activation;
pub mod schedule;
pub mod seed;
pub mod showtime;
pub mod store;

pub use activation::{ActivationController, ActivationOutcome, ActivationRequest};
pub use seed::{apply_seed, load_seed_file, SeedCampaign};
pub use schedule::{Schedule, ScheduleBook, ScheduleStatus};
pub use showtime::{Showtime, ShowtimeDecision};
pub use store::CampaignStore;
