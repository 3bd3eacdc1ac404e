pub mod job;
pub mod queue;

pub use job::{Job, JobError, JobInfo};
pub use queue::{JobQueue, QueuedJob};
