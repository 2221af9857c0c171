//! vipcast-routing — the routing capability consumed by the engine.
//!
//! The engine never talks to a routing protocol directly. It holds an
//! `Arc<dyn RouteController>` handed to it at construction and issues
//! five calls: add a peer, announce a route, withdraw a route, query
//! the peer, and shut the session down.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   └── Arc<dyn RouteController>
//!         ├── LocalRib (in-process paths, used standalone and in tests)
//!         └── any external speaker adapter
//! ```
//!
//! Every call must be safe to repeat: announcing an advertised route
//! or withdrawing an absent one is not an error.

pub mod controller;
pub mod error;
pub mod rib;

pub use controller::{PeerState, PeerStatus, RouteController, SpeakerConfig};
pub use error::{RoutingError, RoutingResult};
pub use rib::{LocalRib, Path, RibEvent};
