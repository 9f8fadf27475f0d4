//! Task queues, notification dispatch and the run driver for genchain.
//!
//! Each pipeline family (generation, enhancement, animation) has its own
//! single-flight queue. Submissions are queued as tasks; completion
//! notifications are applied to the job tree by the dispatcher, which queues
//! whatever stage comes next.

pub mod context;
pub mod dispatcher;
pub mod orchestrator;
pub mod queue;
mod submit;

#[cfg(test)]
mod testing;

pub use context::{PipelineContext, PipelineSettings, QueueSet};
pub use dispatcher::{Dispatch, EventDispatcher};
pub use orchestrator::{Orchestrator, RunSummary};
pub use queue::{QueuedTask, TaskOutcome, TaskQueue};
