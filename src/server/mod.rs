//! Accept loop and worker threads.

pub mod listener;
pub mod pool;
