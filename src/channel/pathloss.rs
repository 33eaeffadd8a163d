//! Large-scale pathloss with correlated shadowing, TR 37.885 V2V curves.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal, StandardNormal};

use crate::config::{Condition, Scenario};
use crate::scene::{Vec3, VehicleId};

// Fraction of type-3 (truck-height) vehicles assumed for NLOSv blockage.
const TRUCK_FRACTION: f64 = 1.0 / 3.0;
const TRUCK_HEIGHT_M: f64 = 3.0;
const CAR_HEIGHT_M: f64 = 1.6;

struct ShadowingState {
    value_db: f64,
    position: Vec3,
}

/// Pathloss model for one scenario. Shadowing is log-normal and spatially
/// correlated: moving a short distance keeps most of the previous draw.
pub struct PathlossModel {
    scenario: Scenario,
    fc_ghz: f64,
    shadowing: HashMap<(VehicleId, VehicleId), ShadowingState>,
}

impl PathlossModel {
    pub fn new(scenario: Scenario, center_frequency_hz: f64) -> Self {
        Self {
            scenario,
            fc_ghz: center_frequency_hz / 1e9,
            shadowing: HashMap::new(),
        }
    }

    /// Total large-scale loss in dB for the link `a` -> `b`. Zero-distance
    /// links lose nothing.
    pub fn loss_db(
        &mut self,
        a: VehicleId,
        b: VehicleId,
        a_pos: Vec3,
        b_pos: Vec3,
        condition: Condition,
        rng: &mut StdRng,
    ) -> f64 {
        let d3 = a_pos.distance(b_pos);
        if d3 <= 0.0 {
            return 0.0;
        }

        let mut loss = match (self.scenario, condition) {
            (Scenario::V2vHighway, Condition::Los | Condition::Nlosv) => {
                32.4 + 20.0 * d3.log10() + 20.0 * self.fc_ghz.log10()
            }
            (Scenario::V2vUrban, Condition::Los | Condition::Nlosv) => {
                38.77 + 16.7 * d3.log10() + 18.2 * self.fc_ghz.log10()
            }
            (_, Condition::Nlos) => 36.85 + 30.0 * d3.log10() + 18.9 * self.fc_ghz.log10(),
        };

        if condition == Condition::Nlosv {
            loss += nlosv_blockage_loss_db(d3, a_pos.z, b_pos.z, rng);
        }

        loss + self.correlated_shadowing_db(a, b, a_pos, condition, rng)
    }

    fn correlated_shadowing_db(
        &mut self,
        a: VehicleId,
        b: VehicleId,
        a_pos: Vec3,
        condition: Condition,
        rng: &mut StdRng,
    ) -> f64 {
        // Standard deviation and decorrelation distance per TR 36.885 A.1.4.
        let (std_db, corr_dist_m) = match (self.scenario, condition) {
            (Scenario::V2vHighway, _) => (3.0, 25.0),
            (Scenario::V2vUrban, Condition::Nlos) => (4.0, 10.0),
            (Scenario::V2vUrban, _) => (3.0, 10.0),
        };

        let key = if a <= b { (a, b) } else { (b, a) };
        let fresh: f64 = {
            let n: f64 = rng.sample(StandardNormal);
            n * std_db
        };
        let value = match self.shadowing.get(&key) {
            Some(prev) => {
                let dx = a_pos.x - prev.position.x;
                let dy = a_pos.y - prev.position.y;
                let moved = (dx * dx + dy * dy).sqrt();
                let r = (-moved / corr_dist_m).exp();
                r * prev.value_db + (1.0 - r * r).sqrt() * fresh
            }
            None => fresh,
        };
        self.shadowing.insert(
            key,
            ShadowingState {
                value_db: value,
                position: a_pos,
            },
        );
        value
    }

    /// Drop the shadowing history of every link touching a vehicle.
    pub fn forget_vehicle(&mut self, id: VehicleId) {
        self.shadowing.retain(|key, _| key.0 != id && key.1 != id);
    }
}

/// Additional vehicle blockage loss for NLOSv links, TR 37.885 v15.2.0.
/// The blocker height is drawn from the vehicle-type mix; the loss is
/// max(0, log-normal) with distance-dependent mean.
fn nlosv_blockage_loss_db(distance_3d: f64, h_a: f64, h_b: f64, rng: &mut StdRng) -> f64 {
    let blocker_height = if rng.gen::<f64>() < TRUCK_FRACTION {
        TRUCK_HEIGHT_M
    } else {
        CAR_HEIGHT_M
    };

    let (mean, std) = if h_a.min(h_b) > blocker_height {
        // Both antennas see over the blocker.
        return 0.0;
    } else if h_a.max(h_b) < blocker_height {
        (
            9.0 + (15.0 * distance_3d.log10() - 41.0).max(0.0),
            4.5,
        )
    } else {
        (
            5.0 + (15.0 * distance_3d.log10() - 41.0).max(0.0),
            4.0,
        )
    };

    // TR 37.885 gives mean/std of the log-normal variable itself; convert
    // to the underlying normal parameters.
    let mu = (mean * mean / (std * std + mean * mean).sqrt()).ln();
    let sigma = (1.0 + std * std / (mean * mean)).ln().sqrt();
    match LogNormal::new(mu, sigma) {
        Ok(dist) => dist.sample(rng).max(0.0),
        // Degenerate parameters collapse to the mean.
        Err(_) => mean.max(0.0),
    }
}
