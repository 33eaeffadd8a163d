//! Scene description: vehicles, sidelink groups and traffic flows, loaded
//! from a JSON file.

use std::path::Path;

use serde::Deserialize;

use crate::config::SimConfig;
use crate::error::{Error, Result};

/// Identifier of a vehicle in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub u16);

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Identifier of a traffic flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub u16);

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Cartesian position or velocity in meters / meters per second.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance(self, other: Vec3) -> f64 {
        self.sub(other).length()
    }
}

/// One vehicle: initial kinematics and antenna height.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleSpec {
    pub id: VehicleId,
    pub position: Vec3,
    #[serde(default)]
    pub velocity: Vec3,
}

/// One unidirectional traffic flow: periodic packets queued at the
/// transmitter for delivery to the receiver.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    pub id: FlowId,
    pub tx: VehicleId,
    pub rx: VehicleId,
    /// Packet size queued per period, bytes.
    pub packet_bytes: u32,
    /// Packet inter-arrival time, microseconds.
    pub period_us: u64,
}

/// Complete scene: simulation horizon, RNG seed, configuration, vehicles,
/// sidelink groups (each with its own scheduler, sharing the spectrum) and
/// flows.
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    pub seed: u64,
    pub duration_us: u64,
    #[serde(default)]
    pub config: SimConfig,
    pub vehicles: Vec<VehicleSpec>,
    /// Vehicle ids per sidelink group. A vehicle belongs to exactly one
    /// group; flows stay inside their group.
    pub groups: Vec<Vec<VehicleId>>,
    pub flows: Vec<FlowSpec>,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Scene> {
        let data = std::fs::read_to_string(path)?;
        let scene: Scene = serde_json::from_str(&data)?;
        scene.validate()?;
        Ok(scene)
    }

    /// Reject inconsistent scenes before the run context is built.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        if self.duration_us == 0 {
            return Err(Error::Scene("simulation duration is zero".into()));
        }
        if self.vehicles.is_empty() {
            return Err(Error::Scene("scene has no vehicles".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for v in &self.vehicles {
            if !seen.insert(v.id) {
                return Err(Error::Scene(format!("duplicate vehicle id {}", v.id)));
            }
        }

        let mut grouped = std::collections::HashSet::new();
        for group in &self.groups {
            if group.is_empty() {
                return Err(Error::Scene("empty sidelink group".into()));
            }
            for id in group {
                if !seen.contains(id) {
                    return Err(Error::UnknownVehicle(id.0));
                }
                if !grouped.insert(*id) {
                    return Err(Error::Scene(format!(
                        "vehicle {} appears in more than one group",
                        id
                    )));
                }
            }
        }

        let group_of = |id: VehicleId| self.groups.iter().position(|g| g.contains(&id));
        let mut flow_ids = std::collections::HashSet::new();
        for flow in &self.flows {
            if !flow_ids.insert(flow.id) {
                return Err(Error::Scene(format!("duplicate flow id {}", flow.id)));
            }
            if flow.tx == flow.rx {
                return Err(Error::Scene(format!(
                    "flow {} transmits to itself",
                    flow.id
                )));
            }
            for id in [flow.tx, flow.rx] {
                if !seen.contains(&id) {
                    return Err(Error::UnknownVehicle(id.0));
                }
            }
            match (group_of(flow.tx), group_of(flow.rx)) {
                (Some(a), Some(b)) if a == b => {}
                (Some(_), Some(_)) => {
                    return Err(Error::Scene(format!(
                        "flow {} crosses sidelink groups",
                        flow.id
                    )));
                }
                _ => {
                    return Err(Error::Scene(format!(
                        "flow {} endpoints are not in any group",
                        flow.id
                    )));
                }
            }
            if flow.packet_bytes == 0 {
                return Err(Error::Scene(format!("flow {} has empty packets", flow.id)));
            }
            if flow.period_us == 0 {
                return Err(Error::Scene(format!("flow {} has zero period", flow.id)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_vehicle_scene() -> Scene {
        Scene {
            seed: 1,
            duration_us: 1_000_000,
            config: SimConfig::default(),
            vehicles: vec![
                VehicleSpec {
                    id: VehicleId(0),
                    position: Vec3::new(0.0, 0.0, 1.6),
                    velocity: Vec3::new(10.0, 0.0, 0.0),
                },
                VehicleSpec {
                    id: VehicleId(1),
                    position: Vec3::new(50.0, 0.0, 1.6),
                    velocity: Vec3::new(10.0, 0.0, 0.0),
                },
            ],
            groups: vec![vec![VehicleId(0), VehicleId(1)]],
            flows: vec![FlowSpec {
                id: FlowId(0),
                tx: VehicleId(0),
                rx: VehicleId(1),
                packet_bytes: 1200,
                period_us: 10_000,
            }],
        }
    }

    #[test]
    fn valid_scene_passes() {
        assert!(two_vehicle_scene().validate().is_ok());
    }

    #[test]
    fn duplicate_vehicle_id_is_rejected() {
        let mut scene = two_vehicle_scene();
        scene.vehicles[1].id = VehicleId(0);
        assert!(scene.validate().is_err());
    }

    #[test]
    fn flow_to_unknown_vehicle_is_rejected() {
        let mut scene = two_vehicle_scene();
        scene.flows[0].rx = VehicleId(9);
        assert!(matches!(
            scene.validate(),
            Err(Error::UnknownVehicle(9))
        ));
    }

    #[test]
    fn self_flow_is_rejected() {
        let mut scene = two_vehicle_scene();
        scene.flows[0].rx = scene.flows[0].tx;
        assert!(scene.validate().is_err());
    }

    #[test]
    fn cross_group_flow_is_rejected() {
        let mut scene = two_vehicle_scene();
        scene.groups = vec![vec![VehicleId(0)], vec![VehicleId(1)]];
        assert!(scene.validate().is_err());
    }

    #[test]
    fn scene_parses_from_json() {
        let json = r#"{
            "seed": 7,
            "duration_us": 500000,
            "vehicles": [
                {"id": 0, "position": {"x": 0.0, "y": 0.0, "z": 1.6}},
                {"id": 1, "position": {"x": 30.0, "y": 0.0, "z": 1.6},
                 "velocity": {"x": -5.0, "y": 0.0, "z": 0.0}}
            ],
            "groups": [[0, 1]],
            "flows": [
                {"id": 0, "tx": 0, "rx": 1, "packet_bytes": 800, "period_us": 20000}
            ]
        }"#;
        let scene: Scene = serde_json::from_str(json).unwrap();
        assert!(scene.validate().is_ok());
        assert_eq!(scene.vehicles.len(), 2);
        assert_eq!(scene.flows[0].packet_bytes, 800);
    }
}
