//! Resumable batch progress
//!
//! Provides persistent progress state with atomic writes and run locking.

pub mod lock;
pub mod state;

pub use lock::RunLock;
pub use state::{
    compute_fingerprint, ProgressState, ResumeError, ResumeMode, ResumeOutcome, MAX_STATE_FILE_SIZE,
    SCHEMA_VERSION,
};
