//! Conversion planning and processing.
//!
//! - [`planner`] decides the route for an accepted file
//! - [`tracker`] owns the per-item status state machine
//! - [`queue`] runs jobs on the local or remote [`ProcessingCapability`]
//!
//! ```text
//! pending ──► processing ────────┬──► processed
//!    │                           │
//!    ├──────► server_processing ─┴──► failed
//!    │
//!    └──────► processed   (passthrough)
//! ```

pub mod capability;
mod command;
pub mod planner;
pub mod queue;
mod remote;
pub mod tracker;

pub use capability::{
    CapabilityError, JobDescription, ProcessingCapability, ProcessingOutcome, Submission,
    SuccessReport,
};
pub use command::CommandProcessor;
pub use planner::{plan, PlanError, PlannerCapabilities};
pub use queue::{spawn_deadline_sweeper, Capabilities, ProcessingQueue};
pub use remote::RemoteProcessor;
pub use tracker::{PlanApplied, ProcessingTracker, Reported, TrackerError};
