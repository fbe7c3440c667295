#![warn(clippy::unwrap_used)]

pub mod client;
pub mod local;
pub mod store;

pub use client::RedisSegmentStore;
pub use local::LocalSegmentStore;
pub use store::SegmentStore;
