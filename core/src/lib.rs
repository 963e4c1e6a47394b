//! # Execution Core
//!
//! Copy-trading order execution: a teacher's trade is replicated onto each student account
//! through a per-account brokerage session, with bounded retries, confirmation against the
//! order book and a position ledger that records every confirmed fill.

pub mod batch;
pub mod config;
pub mod error;
pub mod resolver;
pub mod session;
pub mod submitter;
pub mod types;
pub mod workflow;

pub use batch::{BatchOrchestrator, BatchOrchestratorBuilder};
pub use config::{ExecutionConfig, RetryPolicy};
pub use error::{BatchError, ExecutionError, ExecutionResult};
pub use resolver::InstrumentResolver;
pub use session::{SessionGuard, SessionManager};
pub use submitter::{classify_response, OrderSubmitter, Placement, ResponseClass, SubmissionReport};
pub use types::*;
pub use workflow::{AccountProgress, AccountRun, AccountWorkflow};
