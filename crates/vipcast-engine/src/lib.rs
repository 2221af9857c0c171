//! vipcast-engine — decides when each VIP is advertised.
//!
//! The engine owns one runtime record per application, ticks all of
//! them on a fixed interval, turns probe verdicts into announce and
//! withdraw calls, and reconciles reloads and shutdown against the
//! live set.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   ├── Arc<dyn RouteController> (injected routing capability)
//!   ├── Arc<dyn ProbeBuilder>    (injected probe strategies)
//!   ├── apps: name → AppSlot
//!   │     ├── Mutex<AppRuntime>  (one tick at a time per app)
//!   │     └── published snapshot (status, last announced route)
//!   ├── run()      → dispatches a tick per app every monitor_interval
//!   ├── reload()   → diff + add / redefine / update / remove
//!   └── shutdown() → cancel ticks, withdraw everything, close session
//! ```
//!
//! # Flap damping
//!
//! A failing verdict on an announced route only arms a deadline
//! (`cleanup_timer`). Recovery before the deadline costs nothing; the
//! route is withdrawn only when a tick at or after the deadline is
//! still unhealthy.

pub mod engine;
pub mod error;
pub mod reload;
pub mod settings;
pub mod shutdown;
pub mod state;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{Engine, TickOutcome};
pub use error::{EngineError, EngineResult};
pub use reload::{AppApplyResult, ApplyOutcome, ReloadPlan, ReloadReport, plan_reload};
pub use settings::EngineSettings;
pub use shutdown::ShutdownReport;
pub use state::{AppRuntime, RouteAction, RoutePhase};
pub use status::AppStatus;
