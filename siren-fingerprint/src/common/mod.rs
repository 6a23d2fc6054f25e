//! Concurrency primitives shared by the worker pool and the storage layer

pub mod safe_queue;

pub use safe_queue::SafeQueue;
