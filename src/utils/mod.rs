pub mod events;
pub mod log_helpers;
pub mod sse;
