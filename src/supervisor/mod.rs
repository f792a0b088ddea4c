//! Attempt supervision and retry orchestration.

mod attempt;
mod retry;
mod state;

pub use attempt::*;
pub use retry::*;
pub use state::*;
