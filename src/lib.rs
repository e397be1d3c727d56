pub mod calls;
pub mod config;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

pub use calls::{CallError, CallSession, CallState, EstablishedCall, RtpPlan, SessionParams};
pub use config::{ClientConfig, ConfigError, Role, VideoCodec};
