//! CLI module tests.

mod process_test;
mod stream_test;
