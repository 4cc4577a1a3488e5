//! Outbound multiplexing.

pub mod fan_in;
pub mod source;

pub use fan_in::FanIn;
pub use source::{OutboundSource, Producer};
