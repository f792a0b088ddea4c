//! Callback endpoint client.

mod client;

pub use client::*;
