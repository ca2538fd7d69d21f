pub mod backoff;
pub mod render;
pub mod request_hash;

pub use backoff::retry_delay;
pub use render::{RenderError, render};
pub use request_hash::request_hash;
