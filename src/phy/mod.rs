//! PHY layer: per-subcarrier SINR across co-slot transmissions and the
//! transport block outcome draw.

pub mod error_model;

pub use error_model::{tb_size_bytes, BlerCurve, MAX_MCS};

use rand::Rng;
use rand::rngs::StdRng;

use crate::channel::{ChannelEngine, LinkState};
use crate::config::{PhyConfig, PoolConfig};
use crate::error::Result;
use crate::sim::SimTime;

const THERMAL_NOISE_DBM_PER_HZ: f64 = -174.0;

/// Outcome of one transport block reception, delivered to the MAC exactly
/// once per transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TbOutcome {
    pub sinr_db: f64,
    pub ok: bool,
}

pub struct Phy {
    tx_power_dbm: f64,
    noise_figure_db: f64,
    center_frequency_hz: f64,
    subcarrier_spacing_hz: f64,
    subcarriers_per_rbg: u32,
    rbgs_per_subframe: u32,
    bler_curves: Vec<BlerCurve>,
}

impl Phy {
    pub fn new(phy: &PhyConfig, pool: &PoolConfig) -> Self {
        let bler_curves = (0..=MAX_MCS).map(BlerCurve::for_mcs).collect();
        Self {
            tx_power_dbm: phy.tx_power_dbm,
            noise_figure_db: phy.noise_figure_db,
            center_frequency_hz: phy.center_frequency_hz,
            subcarrier_spacing_hz: phy.subcarrier_spacing_hz,
            subcarriers_per_rbg: phy.subcarriers_per_rbg as u32,
            rbgs_per_subframe: pool.rbgs_per_subframe as u32,
            bler_curves,
        }
    }

    /// Absolute center frequencies of the subcarriers in one
    /// resource-block group. The occupied band is centered on the carrier.
    pub fn rbg_frequencies(&self, rbg: u16) -> Vec<f64> {
        let total = (self.rbgs_per_subframe * self.subcarriers_per_rbg) as f64;
        let band_start = self.center_frequency_hz - 0.5 * total * self.subcarrier_spacing_hz;
        let first = rbg as u32 * self.subcarriers_per_rbg;
        (first..first + self.subcarriers_per_rbg)
            .map(|i| band_start + (i as f64 + 0.5) * self.subcarrier_spacing_hz)
            .collect()
    }

    /// Transmit power per occupied subcarrier, watts. The configured power
    /// is spread evenly over one RBG's subcarriers.
    fn subcarrier_tx_power_w(&self) -> f64 {
        let total_w = 10f64.powf((self.tx_power_dbm - 30.0) / 10.0);
        total_w / self.subcarriers_per_rbg as f64
    }

    /// Receiver noise power per subcarrier, watts.
    fn subcarrier_noise_w(&self) -> f64 {
        let noise_dbm_per_hz = THERMAL_NOISE_DBM_PER_HZ + self.noise_figure_db;
        10f64.powf((noise_dbm_per_hz - 30.0) / 10.0) * self.subcarrier_spacing_hz
    }

    /// Average linear SINR over the RBG, in dB.
    ///
    /// `desired_gains` and each entry of `interferer_gains` hold the
    /// per-subcarrier linear power gains of the respective links toward
    /// the receiver.
    pub fn average_sinr_db(
        &self,
        desired_gains: &[f64],
        interferer_gains: &[Vec<f64>],
    ) -> f64 {
        let p_tx = self.subcarrier_tx_power_w();
        let noise = self.subcarrier_noise_w();
        let mut sinr_sum = 0.0;
        for (sc, &g) in desired_gains.iter().enumerate() {
            let signal = p_tx * g;
            let interference: f64 = interferer_gains.iter().map(|gi| p_tx * gi[sc]).sum();
            sinr_sum += signal / (interference + noise);
        }
        let avg = sinr_sum / desired_gains.len() as f64;
        10.0 * avg.log10()
    }

    /// Evaluate one transport block: compute the beamformed SINR of the
    /// desired link over the grant's RBG against all co-slot interferers,
    /// map it through the MCS's BLER curve and draw the outcome.
    pub fn transport_block_outcome(
        &self,
        engine: &mut ChannelEngine,
        desired: &LinkState,
        interferers: &[LinkState],
        rbg: u16,
        mcs: u8,
        now: SimTime,
        rng: &mut StdRng,
    ) -> Result<TbOutcome> {
        let freqs = self.rbg_frequencies(rbg);
        let desired_gains = engine.link_gain(desired, now, &freqs, rng)?;
        let mut interferer_gains = Vec::with_capacity(interferers.len());
        for interferer in interferers {
            interferer_gains.push(engine.link_gain(interferer, now, &freqs, rng)?);
        }

        let sinr_db = self.average_sinr_db(&desired_gains, &interferer_gains);
        let bler = self.bler_curves[mcs.min(MAX_MCS) as usize].bler(sinr_db);
        let ok = rng.gen::<f64>() > bler;
        log::debug!(
            "tb {}->{} rbg {}: sinr {:.1} dB, bler {:.2e}, {}",
            desired.tx,
            desired.rx,
            rbg,
            sinr_db,
            bler,
            if ok { "decoded" } else { "corrupted" }
        );
        Ok(TbOutcome { sinr_db, ok })
    }
}
