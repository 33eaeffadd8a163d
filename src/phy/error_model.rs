//! MCS table and block-error-rate curves.
//!
//! Transport block sizing follows the sidelink MCS ladder: QPSK for MCS
//! 0-9, 16QAM for 10-16, 64QAM for 17-28, each with its effective coding
//! rate. BLER curves are per-MCS breakpoint tables anchored at the Shannon
//! threshold of the MCS's spectral efficiency, interpolated log-linearly
//! and clamped outside the tabulated range.

/// Highest valid MCS index.
pub const MAX_MCS: u8 = 28;

/// Effective coding rate per MCS index.
const EFFECTIVE_CODING_RATE: [f64; 29] = [
    0.08, 0.1, 0.11, 0.15, 0.19, 0.24, 0.3, 0.37, 0.44, 0.51, // QPSK
    0.3, 0.33, 0.37, 0.42, 0.48, 0.54, 0.6, // 16QAM
    0.43, 0.45, 0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.89, 0.92, // 64QAM
];

/// Modulation order (bits per symbol) per MCS index.
pub fn modulation_order(mcs: u8) -> u32 {
    match mcs {
        0..=9 => 2,
        10..=16 => 4,
        _ => 6,
    }
}

/// Spectral efficiency in bits per resource element.
pub fn spectral_efficiency(mcs: u8) -> f64 {
    let mcs = mcs.min(MAX_MCS);
    modulation_order(mcs) as f64 * EFFECTIVE_CODING_RATE[mcs as usize]
}

/// Transport block size in bytes for a grant spanning `subcarriers`
/// frequency resources over `symbols` time symbols.
pub fn tb_size_bytes(mcs: u8, subcarriers: u32, symbols: u32) -> u32 {
    let bits = spectral_efficiency(mcs) * subcarriers as f64 * symbols as f64;
    ((bits / 8.0).floor() as u32).max(1)
}

/// Per-MCS BLER breakpoints: (average SINR dB, block error probability),
/// SINR ascending.
#[derive(Debug, Clone)]
pub struct BlerCurve {
    points: Vec<(f64, f64)>,
}

impl BlerCurve {
    /// Curve anchored at the Shannon threshold of the MCS's spectral
    /// efficiency, with the waterfall shape of a coded link.
    pub fn for_mcs(mcs: u8) -> Self {
        let se = spectral_efficiency(mcs);
        let anchor_db = 10.0 * (2f64.powf(se) - 1.0).log10();
        Self {
            points: vec![
                (anchor_db - 2.0, 0.95),
                (anchor_db, 0.5),
                (anchor_db + 1.0, 0.05),
                (anchor_db + 2.0, 1e-3),
                (anchor_db + 4.0, 1e-5),
            ],
        }
    }

    /// Block error probability at the given average SINR. Below the lowest
    /// breakpoint the block is always lost; above the highest the curve
    /// floors at its last value.
    pub fn bler(&self, sinr_db: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if sinr_db < first.0 {
            return 1.0;
        }
        if sinr_db >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if sinr_db < x1 {
                // Log-linear between breakpoints.
                let t = (sinr_db - x0) / (x1 - x0);
                let log_y = y0.log10() + t * (y1.log10() - y0.log10());
                return 10f64.powf(log_y);
            }
        }
        last.1
    }
}
