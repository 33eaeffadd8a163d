//! Construction-time configuration for a simulation run.
//!
//! Everything here is set once when the run context is built and never
//! mutated afterwards. The structs are plain data with serde derives so a
//! whole run can be described by a scene file; [`SimConfig::validate`]
//! rejects malformed setups before any simulated time advances.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Propagation scenario, selecting the statistical parameter tables of the
/// channel engine and the LOS-probability curves of the condition resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Scenario {
    /// Urban street grid, TR 37.885 V2V-Urban parameterization.
    V2vUrban,
    /// Highway, TR 37.885 V2V-Highway parameterization.
    V2vHighway,
}

/// Propagation condition of a single link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Condition {
    /// Line of sight.
    Los,
    /// Blocked by another vehicle (NLOSv).
    Nlosv,
    /// Blocked by a building or similar static obstruction.
    Nlos,
}

/// How link conditions are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub enum ConditionMode {
    /// Every link gets this condition.
    Fixed(Condition),
    /// Distance-based probabilistic assignment per scenario, drawn once per
    /// link pair and kept until the link is re-created.
    Probabilistic,
}

/// Antenna element radiation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ElementPattern {
    /// Unit gain in every direction.
    Isotropic,
    /// The 3GPP V2V element: 65 degree HPBW, 25 dB front-back ratio and
    /// side-lobe floor.
    ThreeGppV2v,
}

/// Uniform planar antenna array geometry, one per vehicle.
#[derive(Debug, Clone, Deserialize)]
pub struct AntennaConfig {
    /// Vertical element count.
    pub rows: u16,
    /// Horizontal element count.
    pub cols: u16,
    /// Element spacing in wavelengths (both axes).
    pub spacing_wavelengths: f64,
    /// Element pattern.
    pub pattern: ElementPattern,
    /// Boresight element gain in dB, applied on top of the pattern shape.
    pub max_gain_db: f64,
}

impl Default for AntennaConfig {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            spacing_wavelengths: 0.5,
            pattern: ElementPattern::ThreeGppV2v,
            max_gain_db: 8.0,
        }
    }
}

impl AntennaConfig {
    /// Total number of array elements.
    pub fn num_elements(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// Channel engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub scenario: Scenario,
    pub condition_mode: ConditionMode,
    /// Validity window of one channel realization, in microseconds.
    pub coherence_interval_us: u64,
    /// Displacement (meters) of either endpoint that forces an early
    /// recompute inside the coherence window.
    pub displacement_threshold_m: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::V2vUrban,
            condition_mode: ConditionMode::Probabilistic,
            coherence_interval_us: 1_000,
            displacement_threshold_m: 1.0,
        }
    }
}

/// PHY layer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PhyConfig {
    /// Carrier frequency in Hz.
    pub center_frequency_hz: f64,
    /// Subcarrier spacing in Hz.
    pub subcarrier_spacing_hz: f64,
    /// Subcarriers carried by one resource-block group.
    pub subcarriers_per_rbg: u16,
    /// Transmit power at the antenna port, dBm, spread evenly over the
    /// occupied subcarriers.
    pub tx_power_dbm: f64,
    /// Receiver noise figure in dB on top of the -174 dBm/Hz thermal floor.
    pub noise_figure_db: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            center_frequency_hz: 60.0e9,
            subcarrier_spacing_hz: 60.0e3,
            subcarriers_per_rbg: 12,
            tx_power_dbm: 23.0,
            noise_figure_db: 5.0,
        }
    }
}

/// Shape of the shared sidelink resource pool: a recurring frame of
/// `subframes_per_frame` subframes, each carrying `rbgs_per_subframe`
/// frequency-orthogonal resource-block groups.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub subframes_per_frame: u16,
    pub rbgs_per_subframe: u16,
    /// Duration of one subframe in microseconds.
    pub subframe_duration_us: u64,
    /// Data symbols carried by one subframe, used for transport block
    /// sizing.
    pub symbols_per_subframe: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            subframes_per_frame: 10,
            rbgs_per_subframe: 4,
            subframe_duration_us: 1_000,
            symbols_per_subframe: 14,
        }
    }
}

impl PoolConfig {
    /// Duration of one full frame in microseconds.
    pub fn frame_duration_us(&self) -> u64 {
        self.subframes_per_frame as u64 * self.subframe_duration_us
    }
}

/// MAC scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MacConfig {
    /// Fixed MCS index used for every grant.
    pub mcs: u8,
    /// Maximum number of retransmissions of one transport block. The first
    /// transmission does not count, so a grant is attempted at most
    /// `max_retx + 1` times.
    pub max_retx: u8,
    /// Delay between the end of a transmission and the outcome reaching the
    /// scheduler, in microseconds.
    pub feedback_latency_us: u64,
    /// Time after the transmission start at which a missing outcome is
    /// treated as lost feedback. Must exceed the subframe duration plus the
    /// feedback latency, or every grant would time out.
    pub feedback_timeout_us: u64,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            mcs: 14,
            max_retx: 3,
            feedback_latency_us: 1_000,
            feedback_timeout_us: 4_000,
        }
    }
}

/// Complete, validated configuration of one simulation run.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SimConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub phy: PhyConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub antenna: AntennaConfig,
}

impl SimConfig {
    /// Reject malformed setups before a run context is built.
    pub fn validate(&self) -> Result<()> {
        if self.antenna.rows == 0 || self.antenna.cols == 0 {
            return Err(Error::EmptyAntennaArray {
                rows: self.antenna.rows,
                cols: self.antenna.cols,
            });
        }
        if self.antenna.spacing_wavelengths <= 0.0 {
            return Err(Error::InvalidConfig(
                "antenna element spacing must be positive".into(),
            ));
        }
        if self.pool.subframes_per_frame == 0 || self.pool.rbgs_per_subframe == 0 {
            return Err(Error::MalformedResourcePool(format!(
                "{} subframes x {} resource-block groups",
                self.pool.subframes_per_frame, self.pool.rbgs_per_subframe
            )));
        }
        if self.pool.subframe_duration_us == 0 {
            return Err(Error::MalformedResourcePool(
                "subframe duration must be positive".into(),
            ));
        }
        if self.pool.symbols_per_subframe == 0 {
            return Err(Error::MalformedResourcePool(
                "a subframe needs at least one symbol".into(),
            ));
        }
        if self.mac.mcs > 28 {
            return Err(Error::InvalidConfig(format!(
                "MCS {} is out of range (0..=28)",
                self.mac.mcs
            )));
        }
        if self.phy.center_frequency_hz <= 0.0 {
            return Err(Error::InvalidConfig(
                "carrier frequency must be positive".into(),
            ));
        }
        if self.phy.subcarriers_per_rbg == 0 {
            return Err(Error::InvalidConfig(
                "a resource-block group needs at least one subcarrier".into(),
            ));
        }
        if self.phy.subcarrier_spacing_hz <= 0.0 {
            return Err(Error::InvalidConfig(
                "subcarrier spacing must be positive".into(),
            ));
        }
        if self.channel.coherence_interval_us == 0 {
            return Err(Error::InvalidConfig(
                "coherence interval must be positive".into(),
            ));
        }
        if self.mac.feedback_timeout_us <= self.pool.subframe_duration_us + self.mac.feedback_latency_us {
            return Err(Error::InvalidConfig(
                "feedback timeout must exceed subframe duration plus feedback latency".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_element_array_is_rejected() {
        let mut cfg = SimConfig::default();
        cfg.antenna.rows = 0;
        assert!(matches!(
            cfg.validate(),
            Err(Error::EmptyAntennaArray { .. })
        ));
    }

    #[test]
    fn malformed_pool_is_rejected() {
        let mut cfg = SimConfig::default();
        cfg.pool.rbgs_per_subframe = 0;
        assert!(matches!(
            cfg.validate(),
            Err(Error::MalformedResourcePool(_))
        ));
    }

    #[test]
    fn feedback_timeout_must_cover_latency() {
        let mut cfg = SimConfig::default();
        cfg.mac.feedback_timeout_us = cfg.mac.feedback_latency_us;
        assert!(cfg.validate().is_err());
    }
}
