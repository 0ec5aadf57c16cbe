pub mod pool;

pub use pool::{QueuedUpload, SubmitError, WorkerPool};
