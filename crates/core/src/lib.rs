//! SkillSync Simulation Core
//!
//! Everything a screen needs to run one interactive training simulation:
//! the remote client, the session state machine and the engine that drives
//! it, the incremental reveal, audio cues and the optional speech bridge.

pub mod client;
pub mod content;
pub mod engine;
pub mod images;
pub mod models;
pub mod reveal;
pub mod session;
pub mod speech;
pub mod tone;
