//! Segment providers, the cross-provider aggregator and the segment
//! membership cache used to gate campaigns by audience.

pub mod aggregator;
pub mod cache;
pub mod gate;
pub mod http;
pub mod provider;

pub use aggregator::{SegmentAggregator, SegmentListing};
pub use cache::{Membership, RefreshOutcome, SegmentCache};
pub use gate::SegmentGate;
pub use http::HttpSegmentProvider;
pub use provider::{SegmentProvider, StaticSegmentProvider};
