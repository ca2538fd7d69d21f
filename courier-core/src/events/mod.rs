//! In-process live event fan-out.
//!
//! State changes in the pipeline are published on a [`LiveEventBus`] and
//! relayed to dashboard connections. Events are ephemeral: nothing is
//! persisted and nothing is buffered for consumers that are not connected.

pub mod bus;

pub use bus::{Delivery, LiveEventBus, Subscription};
pub use courier_sdk::objects::LiveEvent;
pub use courier_sdk::objects::live::{BATCH_COMPLETED, DISPATCH_UPDATED};
