//! Shared services used across clients.

mod queue;

pub use queue::QueueStore;
