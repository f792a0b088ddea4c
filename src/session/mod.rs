//! Session persistence across invocations.

mod store;

pub use store::*;
