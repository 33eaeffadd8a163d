//! Millimeter-wave V2V sidelink simulator.
//!
//! Models groups of vehicles exchanging transport blocks over a shared
//! sidelink resource pool: a cluster/ray fading channel with analog
//! beamforming, a SINR/BLER link abstraction and a sensing-free mode-2
//! scheduler, all driven by a deterministic discrete-event loop.

pub mod channel;
pub mod config;
pub mod error;
pub mod mac;
pub mod phy;
pub mod scene;
pub mod sim;
pub mod stats;

pub use error::{Error, Result};
pub use scene::Scene;
pub use sim::Simulation;
