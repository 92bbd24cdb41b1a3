// =============================================================================
// Market Feed — WebSocket adapter boundary
// =============================================================================

pub mod client;

pub use client::{FeedClient, FeedEvent};
