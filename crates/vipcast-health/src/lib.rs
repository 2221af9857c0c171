//! vipcast-health — health probes for anycast applications.
//!
//! Provides the `Probe` capability and its two strategies (TCP port,
//! external command), a concurrent runner that bounds every probe by
//! a timeout, and per-probe result tracking.
//!
//! # Architecture
//!
//! ```text
//! run_all(probes, target, timeout, cancel)
//!   ├── one task per probe (panics contained)
//!   │   ├── PortProbe  → TCP connect
//!   │   └── ExecProbe  → child process, exit status
//!   └── Vec<ProbeOutcome> in probe order
//! aggregate(outcomes) → HealthStatus (logical AND)
//! ```
//!
//! Probes fail closed: a timeout, a spawn error, or a panic all yield
//! `Unhealthy` with a reason string. Nothing escapes as an error.

pub mod checker;
pub mod probe;

pub use checker::{ProbeTracker, aggregate, run_all};
pub use probe::{
    ExecProbe, PortProbe, Probe, ProbeBuilder, ProbeOutcome, ProbeResult, SystemProbes,
};
