//! ringleader-agent — the device-side agent.
//!
//! A [`DeviceAgent`] registers with the master, then runs a single control
//! loop that interleaves periodic heartbeats, simulated metric drift, and
//! incoming message handling until it is shut down.

pub mod agent;

pub use agent::{AgentConfig, DeviceAgent, TaskHandler};
