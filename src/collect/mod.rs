pub mod collector;
pub mod jobs;
pub mod work;

pub use collector::BatchCollector;
pub use jobs::{spawn_collection, CollectionJob, CollectionOptions, JobStatus};
pub use work::{BatchReport, Outcome, OutcomeStatus, WorkItem};
