//! Claude Relay - supervised Claude Code invocation with session continuity.

pub mod callback;
pub mod cli;
pub mod config;
pub mod display;
pub mod mock;
pub mod session;
pub mod signals;
pub mod supervisor;
