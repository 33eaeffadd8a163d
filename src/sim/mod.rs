//! Deterministic discrete-event run context.
//!
//! One `Simulation` owns the event queue, the seeded RNG, the channel
//! engine, the PHY and one MAC scheduler per sidelink group. All groups
//! share the spectrum: transmissions granted the same (subframe, RBG) cell
//! in different groups interfere at the receiver.

pub mod queue;

pub use queue::{EventId, EventQueue, SimTime};

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use crate::channel::{ChannelEngine, LinkState};
use crate::config::SimConfig;
use crate::error::{Error, Result};
use crate::mac::{PoolSlot, SchedulingGrant, SidelinkMac};
use crate::phy::{Phy, TbOutcome};
use crate::scene::{FlowId, FlowSpec, Scene, Vec3, VehicleId};
use crate::stats::SimStats;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    /// Queue one packet on a flow and schedule the next arrival.
    PacketArrival { flow: FlowId },
    /// Frame boundary: advance kinematics and run every group's
    /// scheduling round.
    FrameStart,
    TxStart { group: usize, grant: SchedulingGrant },
    TxEnd { group: usize, grant: SchedulingGrant },
    Feedback {
        group: usize,
        grant: SchedulingGrant,
        outcome: TbOutcome,
    },
    FeedbackTimeout { group: usize, grant: SchedulingGrant },
}

struct VehicleCtx {
    position: Vec3,
    velocity: Vec3,
}

struct GroupCtx {
    mac: SidelinkMac,
    /// Grants of the current frame, for co-cell interference lookup.
    frame_grants: Vec<SchedulingGrant>,
}

pub struct Simulation {
    cfg: SimConfig,
    duration: SimTime,
    queue: EventQueue<Event>,
    rng: StdRng,
    engine: ChannelEngine,
    phy: Phy,
    groups: Vec<GroupCtx>,
    vehicles: BTreeMap<VehicleId, VehicleCtx>,
    flows: BTreeMap<FlowId, (usize, FlowSpec)>,
    /// Pending feedback-timeout event per transmitter, cancelled when the
    /// outcome arrives first.
    timeouts: BTreeMap<VehicleId, EventId>,
    last_move: SimTime,
    stats: SimStats,
}

impl Simulation {
    pub fn new(scene: &Scene) -> Result<Self> {
        scene.validate()?;
        let cfg = scene.config.clone();

        let mut groups = Vec::with_capacity(scene.groups.len());
        for _ in &scene.groups {
            groups.push(GroupCtx {
                mac: SidelinkMac::new(&cfg.mac, &cfg.phy, &cfg.pool)?,
                frame_grants: Vec::new(),
            });
        }

        let mut flows = BTreeMap::new();
        for flow in &scene.flows {
            let group = scene
                .groups
                .iter()
                .position(|g| g.contains(&flow.tx))
                .ok_or(Error::UnknownVehicle(flow.tx.0))?;
            groups[group].mac.register_flow(flow.id, flow.tx, flow.rx);
            flows.insert(flow.id, (group, flow.clone()));
        }

        let vehicles = scene
            .vehicles
            .iter()
            .map(|v| {
                (
                    v.id,
                    VehicleCtx {
                        position: v.position,
                        velocity: v.velocity,
                    },
                )
            })
            .collect();

        let mut queue = EventQueue::new();
        for flow in &scene.flows {
            queue.schedule(SimTime::ZERO, Event::PacketArrival { flow: flow.id });
        }
        queue.schedule(SimTime::ZERO, Event::FrameStart);

        log::info!(
            "simulation: {} vehicles, {} groups, {} flows, seed {}",
            scene.vehicles.len(),
            scene.groups.len(),
            scene.flows.len(),
            scene.seed
        );

        Ok(Self {
            engine: ChannelEngine::new(&cfg)?,
            phy: Phy::new(&cfg.phy, &cfg.pool),
            cfg,
            duration: SimTime::from_us(scene.duration_us),
            queue,
            rng: StdRng::seed_from_u64(scene.seed),
            groups,
            vehicles,
            flows,
            timeouts: BTreeMap::new(),
            last_move: SimTime::ZERO,
            stats: SimStats::default(),
        })
    }

    /// Drive the event loop until the simulation horizon.
    pub fn run(&mut self) -> Result<()> {
        while let Some((now, event)) = self.queue.pop() {
            if now >= self.duration {
                break;
            }
            self.handle(now, event)?;
        }
        log::info!("simulation finished at {}", self.duration);
        Ok(())
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn export_stats(&self) -> Value {
        self.stats.export()
    }

    fn handle(&mut self, now: SimTime, event: Event) -> Result<()> {
        match event {
            Event::PacketArrival { flow } => self.on_packet_arrival(now, flow),
            Event::FrameStart => self.on_frame_start(now),
            Event::TxStart { group, grant } => {
                self.groups[group].mac.on_tx_start(&grant);
                self.stats.record_transmission(grant.rv);
                Ok(())
            }
            Event::TxEnd { group, grant } => self.on_tx_end(now, group, grant),
            Event::Feedback {
                group,
                grant,
                outcome,
            } => {
                if let Some(id) = self.timeouts.remove(&grant.tx) {
                    self.queue.cancel(id);
                }
                for note in self.groups[group].mac.on_feedback(&grant, outcome) {
                    self.stats.record_notification(&note);
                }
                Ok(())
            }
            Event::FeedbackTimeout { group, grant } => {
                self.timeouts.remove(&grant.tx);
                for note in self.groups[group].mac.on_feedback_timeout(&grant) {
                    self.stats.record_notification(&note);
                }
                Ok(())
            }
        }
    }

    fn on_packet_arrival(&mut self, now: SimTime, flow: FlowId) -> Result<()> {
        let (group, spec) = self
            .flows
            .get(&flow)
            .ok_or_else(|| Error::Scene(format!("arrival on unregistered flow {flow}")))
            .map(|(g, s)| (*g, s.clone()))?;
        self.groups[group].mac.enqueue(flow, spec.packet_bytes);
        self.stats.record_enqueue(flow, spec.packet_bytes);
        self.queue.schedule(
            now.offset(spec.period_us),
            Event::PacketArrival { flow },
        );
        Ok(())
    }

    fn on_frame_start(&mut self, now: SimTime) -> Result<()> {
        self.advance_kinematics(now);

        for group_idx in 0..self.groups.len() {
            let round = self.groups[group_idx].mac.schedule_round();
            for note in &round.notifications {
                self.stats.record_notification(note);
            }
            self.groups[group_idx].frame_grants = round.grants.clone();
            for grant in round.grants {
                let tx_start =
                    now.offset(grant.slot.subframe as u64 * self.cfg.pool.subframe_duration_us);
                let tx_end = tx_start.offset(self.cfg.pool.subframe_duration_us);
                self.queue.schedule(
                    tx_start,
                    Event::TxStart {
                        group: group_idx,
                        grant,
                    },
                );
                self.queue.schedule(
                    tx_end,
                    Event::TxEnd {
                        group: group_idx,
                        grant,
                    },
                );
                let timeout_id = self.queue.schedule(
                    tx_start.offset(self.cfg.mac.feedback_timeout_us),
                    Event::FeedbackTimeout {
                        group: group_idx,
                        grant,
                    },
                );
                self.timeouts.insert(grant.tx, timeout_id);
            }
        }

        self.queue.schedule(
            now.offset(self.cfg.pool.frame_duration_us()),
            Event::FrameStart,
        );
        Ok(())
    }

    /// Evaluate the transport block against every co-cell transmission in
    /// the other groups and schedule the feedback delivery.
    fn on_tx_end(&mut self, now: SimTime, group: usize, grant: SchedulingGrant) -> Result<()> {
        self.groups[group].mac.on_tx_end(&grant);

        let desired = self.link_state(grant.tx, grant.rx)?;
        let interferers = self.co_cell_interferers(group, &grant)?;
        let outcome = self.phy.transport_block_outcome(
            &mut self.engine,
            &desired,
            &interferers,
            grant.slot.rbg,
            grant.mcs,
            now,
            &mut self.rng,
        )?;

        self.queue.schedule(
            now.offset(self.cfg.mac.feedback_latency_us),
            Event::Feedback {
                group,
                grant,
                outcome,
            },
        );
        Ok(())
    }

    /// Transmitters granted the same cell in other groups, as interference
    /// paths toward this grant's receiver. Each interferer keeps its beam on
    /// its own receiver and the victim keeps its beam on its desired
    /// transmitter, so co-cell coupling sees the actual beam mismatch.
    fn co_cell_interferers(
        &self,
        group: usize,
        grant: &SchedulingGrant,
    ) -> Result<Vec<LinkState>> {
        let cell: PoolSlot = grant.slot;
        let mut links = Vec::new();
        for (other_idx, other) in self.groups.iter().enumerate() {
            if other_idx == group {
                continue;
            }
            for other_grant in &other.frame_grants {
                if other_grant.slot == cell {
                    let mut path = self.link_state(other_grant.tx, grant.rx)?;
                    path.tx_aim = self.vehicle_position(other_grant.rx)?;
                    path.rx_aim = self.vehicle_position(grant.tx)?;
                    links.push(path);
                }
            }
        }
        Ok(links)
    }

    fn vehicle_position(&self, id: VehicleId) -> Result<Vec3> {
        self.vehicles
            .get(&id)
            .map(|ctx| ctx.position)
            .ok_or(Error::UnknownVehicle(id.0))
    }

    fn link_state(&self, tx: VehicleId, rx: VehicleId) -> Result<LinkState> {
        let t = self.vehicles.get(&tx).ok_or(Error::UnknownVehicle(tx.0))?;
        let r = self.vehicles.get(&rx).ok_or(Error::UnknownVehicle(rx.0))?;
        Ok(LinkState::aligned(
            tx,
            rx,
            t.position,
            r.position,
            t.velocity,
            r.velocity,
        ))
    }

    /// Move every vehicle along its velocity for the elapsed interval.
    fn advance_kinematics(&mut self, now: SimTime) {
        let dt = (now.as_us() - self.last_move.as_us()) as f64 * 1e-6;
        if dt <= 0.0 {
            return;
        }
        for ctx in self.vehicles.values_mut() {
            ctx.position.x += ctx.velocity.x * dt;
            ctx.position.y += ctx.velocity.y * dt;
            ctx.position.z += ctx.velocity.z * dt;
        }
        self.last_move = now;
    }
}
