//! SkillSync Console Library Crate
//!
//! Terminal front end for a simulation session: environment configuration,
//! speaker output for the tone generator, command-line speech playback and
//! the incremental screen renderer. The `skillsync` binary wires these to a
//! [`skillsync_core::engine::SessionEngine`].

pub mod audio;
pub mod config;
pub mod screen;
pub mod voice;
