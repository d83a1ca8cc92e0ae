//! Full sync runs: credential, paginated fetch, batched reconciliation and
//! an audit entry per run.

mod fixture;
mod log;
mod orchestrator;
mod retry;
mod source;

#[cfg(test)]
mod tests;

pub use fixture::{FixtureSource, SyncFixture};
pub use log::{
    MemorySyncLog, NewSyncLog, SyncLogEntry, SyncLogError, SyncLogFilter, SyncLogStore, SyncStatus,
};
pub use orchestrator::{StopSignal, SyncError, SyncOrchestrator, SyncOutcome, SyncParams};
pub use retry::RetryPolicy;
pub use source::{RecordPage, RecordSource, UpstreamError, UpstreamFailure};
