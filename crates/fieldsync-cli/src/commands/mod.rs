pub mod capture;
pub mod clear;
pub mod common;
pub mod list;
pub mod retry;
pub mod stats;
pub mod sync;
pub mod watch;
