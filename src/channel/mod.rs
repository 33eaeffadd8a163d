//! mmWave V2V channel: antenna arrays, propagation condition, large-scale
//! pathloss and the cluster/ray fast-fading engine.

pub mod antenna;
pub mod condition;
pub mod engine;
pub mod params;
pub mod pathloss;

pub use antenna::AntennaArray;
pub use condition::ConditionResolver;
pub use engine::{ChannelEngine, ChannelRealization, LinkState};
pub use params::{ParamsTable, ScenarioParams};
pub use pathloss::PathlossModel;
