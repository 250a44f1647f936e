//! uplift-node: scheduled runner for the uplift budget allocator
//!
//! Loads the unified table from CSV, runs the core components in order and
//! persists each cycle's snapshots and reports to an artifact directory:
//! - Proxy credibility catalog and report
//! - Belief snapshot and fit diagnostics
//! - Allocation plan, explanation and verifier alerts
//! - Optional budget-target search
//! - Run manifest with artifact digests

pub mod config;
pub mod pipeline;
pub mod store;
pub mod table_io;

pub use config::NodeConfig;
pub use pipeline::{Pipeline, RunSummary};
pub use store::{ArtifactStore, RunManifest};
