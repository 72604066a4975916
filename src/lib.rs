//! ophop - multi-hop operator upgrade orchestrator.
//!
//! Plans an ordered list of upgrade hops from image references, deploys a
//! starting version, then drives an [`backend::Installer`] through every hop:
//! skip when the target is not newer, otherwise upgrade, stabilize and
//! validate. The first failure stops the run.

pub mod backend;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod plan;
pub mod stage;
pub mod validate;
pub mod version;

pub use backend::{ExpectedState, Installer, SystemState};
pub use error::OphopError;
pub use orchestrator::{Orchestrator, RunOutcome, RunResult, TeardownPolicy, Timeouts};
pub use plan::{Hop, HopSequence, plan};
pub use version::Version;
