//! Background queue worker — drains ticket messages into the pipeline.

pub mod poller;

pub use poller::{QueueWorker, spawn_queue_worker};
