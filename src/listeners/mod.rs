//! Listener module - lifecycle management for real-time subscriptions.
//!
//! - `ListenerManager` - at most one live subscription per id, idempotent
//!   cleanup, leak-detection stats
//! - `ThrottledCallback` - trailing-edge throttle, most recent value wins
//! - `ListenerScope` - tears down a group of registrations together

mod manager;
mod scope;
mod throttle;

#[allow(unused_imports)]
pub use manager::{
    CleanupHandle, ListenerManager, ListenerStats, SubscriptionError, Unsubscribe, unsubscribe_fn,
};
pub use scope::ListenerScope;
#[allow(unused_imports)]
pub use throttle::ThrottledCallback;
