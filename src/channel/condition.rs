//! Link propagation condition resolver.
//!
//! Conditions are either fixed by configuration or drawn from the TR 37.885
//! distance-based LOS probability curves. A drawn condition is cached per
//! vehicle pair (symmetric) and kept until the pair is forgotten, so both
//! directions of a link always agree.

use std::collections::HashMap;

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::{Condition, ConditionMode, Scenario};
use crate::scene::VehicleId;

pub struct ConditionResolver {
    scenario: Scenario,
    mode: ConditionMode,
    cache: HashMap<(VehicleId, VehicleId), Condition>,
}

impl ConditionResolver {
    pub fn new(scenario: Scenario, mode: ConditionMode) -> Self {
        Self {
            scenario,
            mode,
            cache: HashMap::new(),
        }
    }

    /// Condition of the link between `a` and `b` at 3D distance
    /// `distance_m`. Symmetric in the endpoints.
    pub fn resolve(
        &mut self,
        a: VehicleId,
        b: VehicleId,
        distance_m: f64,
        rng: &mut StdRng,
    ) -> Condition {
        let fixed = match self.mode {
            ConditionMode::Fixed(condition) => Some(condition),
            ConditionMode::Probabilistic => None,
        };
        if let Some(condition) = fixed {
            return condition;
        }

        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(condition) = self.cache.get(&key) {
            return *condition;
        }

        let p_los = los_probability(self.scenario, distance_m);
        let draw: f64 = rng.gen();
        let condition = if draw <= p_los {
            Condition::Los
        } else {
            // Both TR 37.885 V2V curves split the remainder into NLOSv;
            // building blockage (NLOS) is a fixed-condition choice.
            Condition::Nlosv
        };
        log::debug!(
            "link {}-{}: d={:.1}m p_los={:.3} -> {:?}",
            key.0,
            key.1,
            distance_m,
            p_los,
            condition
        );
        self.cache.insert(key, condition);
        condition
    }

    /// Forget every cached condition involving a vehicle.
    pub fn forget_vehicle(&mut self, id: VehicleId) {
        self.cache.retain(|key, _| key.0 != id && key.1 != id);
    }
}

/// LOS probability per TR 37.885.
fn los_probability(scenario: Scenario, distance_m: f64) -> f64 {
    match scenario {
        Scenario::V2vUrban => (1.05 * (-0.0114 * distance_m).exp()).min(1.0),
        Scenario::V2vHighway => {
            if distance_m <= 475.0 {
                (2.1013e-6 * distance_m * distance_m - 0.002 * distance_m + 1.0193).min(1.0)
            } else {
                (0.54 - 0.001 * (distance_m - 475.0)).max(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn fixed_mode_always_returns_the_fixed_condition() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut resolver =
            ConditionResolver::new(Scenario::V2vUrban, ConditionMode::Fixed(Condition::Nlos));
        for d in [1.0, 100.0, 1000.0] {
            assert_eq!(
                resolver.resolve(VehicleId(0), VehicleId(1), d, &mut rng),
                Condition::Nlos
            );
        }
    }

    #[test]
    fn adjacent_vehicles_are_in_los() {
        // Both curves saturate at probability one near zero distance.
        for scenario in [Scenario::V2vUrban, Scenario::V2vHighway] {
            let mut rng = StdRng::seed_from_u64(2);
            let mut resolver = ConditionResolver::new(scenario, ConditionMode::Probabilistic);
            assert_eq!(
                resolver.resolve(VehicleId(3), VehicleId(4), 0.5, &mut rng),
                Condition::Los
            );
        }
    }

    #[test]
    fn resolution_is_symmetric_and_sticky() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut resolver = ConditionResolver::new(Scenario::V2vUrban, ConditionMode::Probabilistic);
        let ab = resolver.resolve(VehicleId(0), VehicleId(1), 300.0, &mut rng);
        for _ in 0..10 {
            assert_eq!(
                resolver.resolve(VehicleId(1), VehicleId(0), 300.0, &mut rng),
                ab
            );
        }
    }

    #[test]
    fn forgetting_a_vehicle_forces_a_fresh_draw() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut resolver = ConditionResolver::new(Scenario::V2vUrban, ConditionMode::Probabilistic);
        // Adjacent draw is LOS with certainty and sticks regardless of the
        // distance of later queries.
        assert_eq!(
            resolver.resolve(VehicleId(0), VehicleId(1), 0.5, &mut rng),
            Condition::Los
        );
        assert_eq!(
            resolver.resolve(VehicleId(0), VehicleId(1), 1000.0, &mut rng),
            Condition::Los
        );
        // After the vehicle is forgotten the pair re-draws at the new
        // distance, where p_los is about 1e-5.
        resolver.forget_vehicle(VehicleId(1));
        assert_eq!(
            resolver.resolve(VehicleId(0), VehicleId(1), 1000.0, &mut rng),
            Condition::Nlosv
        );
    }

    #[test]
    fn distant_urban_links_are_rarely_los() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut resolver = ConditionResolver::new(Scenario::V2vUrban, ConditionMode::Probabilistic);
        let mut los = 0;
        for i in 0..200u16 {
            if resolver.resolve(VehicleId(2 * i), VehicleId(2 * i + 1), 400.0, &mut rng)
                == Condition::Los
            {
                los += 1;
            }
        }
        // p_los(400m) is about 1.1e-2.
        assert!(los < 20);
    }

    #[test]
    fn highway_probability_is_continuous_at_the_piece_boundary() {
        let before = los_probability(Scenario::V2vHighway, 474.999);
        let after = los_probability(Scenario::V2vHighway, 475.001);
        assert!((before - after).abs() < 0.02);
    }
}
