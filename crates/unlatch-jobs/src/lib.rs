//! unlatch-jobs: batch decryption jobs shared by uncoordinated callers
//!
//! - [`registry`]: job records behind one mutual-exclusion boundary
//! - [`claim`]: atomic hand-out of disjoint file batches
//! - [`orchestrator`]: init race, batch loop, pause/resume/cancel/retry
//! - [`reaper`]: expiry sweep and artifact cleanup

pub mod claim;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod reaper;
pub mod registry;

pub use claim::{claim, pending_files, ClaimOutcome};
pub use error::{JobError, JobResult};
pub use job::{
    FileResult, FileStatus, Job, JobConfig, JobStatus, JobView, OutputRef, ProgressUpdate,
    ResolvedDestination,
};
pub use orchestrator::{BatchOutcome, Orchestrator, OrchestratorConfig, WRONG_KEY_HINT};
pub use reaper::{spawn_reaper, sweep_once};
pub use registry::{JobStore, MemoryJobStore, Registry};
