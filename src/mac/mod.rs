//! Sidelink MAC: per-group scheduler, vehicle transmission state machine
//! and retransmission handling.
//!
//! Each sidelink group runs one scheduler over its own resource pool. A
//! scheduling round covers one frame: vehicles with pending traffic are
//! served in buffer-occupancy order (vehicle id breaks ties), each gets at
//! most one (subframe, RBG) cell, and the round's announcement keeps later
//! assignments off already-claimed cells.

pub mod resource_pool;

pub use resource_pool::{PoolSlot, ResourcePool};

use std::collections::HashMap;

use crate::config::{MacConfig, PhyConfig, PoolConfig};
use crate::error::Result;
use crate::phy::{tb_size_bytes, TbOutcome};
use crate::scene::{FlowId, VehicleId};

/// Per-vehicle MAC transmission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacState {
    Idle,
    Scheduled,
    Transmitting,
    AwaitingFeedback,
    /// A negative outcome sent the vehicle back to compete for a cell in
    /// the next round with an incremented retransmission counter.
    Retransmit,
}

/// One granted transmission opportunity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulingGrant {
    pub flow: FlowId,
    pub tx: VehicleId,
    pub rx: VehicleId,
    pub slot: PoolSlot,
    pub tb_bytes: u32,
    pub mcs: u8,
    /// Retransmission counter: 0 on the first attempt, never exceeds
    /// `max_retx`.
    pub rv: u8,
}

/// Upper-layer notifications produced by the MAC.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MacNotification {
    Delivered {
        flow: FlowId,
        bytes: u32,
        sinr_db: f64,
    },
    /// The retry budget of one transport block is exhausted; emitted
    /// exactly once per dropped block.
    DeliveryFailure { flow: FlowId, bytes: u32 },
    /// A mandatory allocation found no free cell this round; the flow is
    /// delayed, not dropped.
    ResourceExhaustion { flow: FlowId },
}

/// Result of one scheduling round.
#[derive(Debug, Clone, Default)]
pub struct RoundSchedule {
    pub grants: Vec<SchedulingGrant>,
    pub notifications: Vec<MacNotification>,
}

struct FlowState {
    id: FlowId,
    tx: VehicleId,
    rx: VehicleId,
    buffer_bytes: u64,
    in_flight: Option<InFlightTb>,
}

struct InFlightTb {
    bytes: u32,
    rv: u8,
}

/// Scheduler of one sidelink group.
pub struct SidelinkMac {
    pool: ResourcePool,
    flows: HashMap<FlowId, FlowState>,
    /// Flow ids per transmitting vehicle, insertion-ordered.
    vehicle_flows: HashMap<VehicleId, Vec<FlowId>>,
    state: HashMap<VehicleId, MacState>,
    mcs: u8,
    max_retx: u8,
    tb_capacity_bytes: u32,
}

impl SidelinkMac {
    pub fn new(mac: &MacConfig, phy: &PhyConfig, pool: &PoolConfig) -> Result<Self> {
        let grid = ResourcePool::new(pool)?;
        log::debug!(
            "scheduler over {} cells per frame, mcs {}",
            grid.cells_per_frame(),
            mac.mcs
        );
        Ok(Self {
            pool: grid,
            flows: HashMap::new(),
            vehicle_flows: HashMap::new(),
            state: HashMap::new(),
            mcs: mac.mcs,
            max_retx: mac.max_retx,
            tb_capacity_bytes: tb_size_bytes(
                mac.mcs,
                phy.subcarriers_per_rbg as u32,
                pool.symbols_per_subframe as u32,
            ),
        })
    }

    pub fn register_flow(&mut self, id: FlowId, tx: VehicleId, rx: VehicleId) {
        self.flows.insert(
            id,
            FlowState {
                id,
                tx,
                rx,
                buffer_bytes: 0,
                in_flight: None,
            },
        );
        self.vehicle_flows.entry(tx).or_default().push(id);
        self.state.entry(tx).or_insert(MacState::Idle);
        self.state.entry(rx).or_insert(MacState::Idle);
    }

    /// Queue bytes on a flow's transmit buffer.
    pub fn enqueue(&mut self, flow: FlowId, bytes: u32) {
        if let Some(state) = self.flows.get_mut(&flow) {
            state.buffer_bytes += bytes as u64;
        } else {
            log::warn!("enqueue on unknown flow {flow}");
        }
    }

    pub fn buffered_bytes(&self, flow: FlowId) -> u64 {
        self.flows.get(&flow).map_or(0, |f| f.buffer_bytes)
    }

    pub fn vehicle_state(&self, vehicle: VehicleId) -> MacState {
        self.state.get(&vehicle).copied().unwrap_or(MacState::Idle)
    }

    /// Run one scheduling round over a fresh frame.
    ///
    /// Vehicles eligible this round are those idle with queued traffic or
    /// waiting to retransmit. They are served by descending buffer
    /// occupancy, ties broken by ascending vehicle id, each receiving the
    /// earliest free cell. Vehicles left without a cell surface as
    /// `ResourceExhaustion`.
    pub fn schedule_round(&mut self) -> RoundSchedule {
        self.pool.begin_frame();
        let mut round = RoundSchedule::default();

        // (vehicle, flow, buffer) of every eligible transmitter.
        let mut candidates: Vec<(VehicleId, FlowId, u64)> = Vec::new();
        for (&vehicle, flow_ids) in &self.vehicle_flows {
            match self.vehicle_state(vehicle) {
                MacState::Idle | MacState::Retransmit => {}
                // Still busy with the previous round's grant.
                _ => continue,
            }
            // A pending retransmission is served before new traffic;
            // otherwise the vehicle transmits its fullest flow, flow id
            // breaking ties for determinism.
            let busiest = flow_ids
                .iter()
                .filter_map(|id| self.flows.get(id))
                .filter(|f| f.buffer_bytes > 0 || f.in_flight.is_some())
                .max_by(|a, b| {
                    a.in_flight
                        .is_some()
                        .cmp(&b.in_flight.is_some())
                        .then(a.buffer_bytes.cmp(&b.buffer_bytes))
                        .then(b.id.cmp(&a.id))
                });
            if let Some(flow) = busiest {
                candidates.push((vehicle, flow.id, flow.buffer_bytes));
            }
        }
        candidates.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        for (vehicle, flow_id, _) in candidates {
            let Some(slot) = self.pool.allocate() else {
                log::warn!("resource pool exhausted, delaying flow {flow_id}");
                round
                    .notifications
                    .push(MacNotification::ResourceExhaustion { flow: flow_id });
                continue;
            };
            let Some(flow) = self.flows.get_mut(&flow_id) else {
                debug_assert!(false, "candidate flow {flow_id} not registered");
                continue;
            };
            let (tb_bytes, rv) = match &flow.in_flight {
                Some(tb) => (tb.bytes, tb.rv),
                None => {
                    let bytes = flow.buffer_bytes.min(self.tb_capacity_bytes as u64) as u32;
                    flow.in_flight = Some(InFlightTb { bytes, rv: 0 });
                    (bytes, 0)
                }
            };
            self.state.insert(vehicle, MacState::Scheduled);
            round.grants.push(SchedulingGrant {
                flow: flow_id,
                tx: vehicle,
                rx: flow.rx,
                slot,
                tb_bytes,
                mcs: self.mcs,
                rv,
            });
        }
        round
    }

    pub fn on_tx_start(&mut self, grant: &SchedulingGrant) {
        debug_assert_eq!(self.vehicle_state(grant.tx), MacState::Scheduled);
        self.state.insert(grant.tx, MacState::Transmitting);
    }

    pub fn on_tx_end(&mut self, grant: &SchedulingGrant) {
        debug_assert_eq!(self.vehicle_state(grant.tx), MacState::Transmitting);
        self.state.insert(grant.tx, MacState::AwaitingFeedback);
    }

    /// Consume the transport block outcome of a grant.
    pub fn on_feedback(
        &mut self,
        grant: &SchedulingGrant,
        outcome: TbOutcome,
    ) -> Vec<MacNotification> {
        if self.vehicle_state(grant.tx) != MacState::AwaitingFeedback {
            log::warn!(
                "stale feedback for {} in state {:?}",
                grant.tx,
                self.vehicle_state(grant.tx)
            );
            return Vec::new();
        }
        if outcome.ok {
            self.resolve_in_flight(grant, MacState::Idle, |flow| {
                vec![MacNotification::Delivered {
                    flow,
                    bytes: grant.tb_bytes,
                    sinr_db: outcome.sinr_db,
                }]
            })
        } else {
            self.handle_negative_outcome(grant)
        }
    }

    /// Missing feedback counts as a negative outcome.
    pub fn on_feedback_timeout(&mut self, grant: &SchedulingGrant) -> Vec<MacNotification> {
        if self.vehicle_state(grant.tx) != MacState::AwaitingFeedback {
            return Vec::new();
        }
        log::warn!("feedback timeout for {} on flow {}", grant.tx, grant.flow);
        self.handle_negative_outcome(grant)
    }

    fn handle_negative_outcome(&mut self, grant: &SchedulingGrant) -> Vec<MacNotification> {
        let max_retx = self.max_retx;
        let retries_left = match self.flows.get_mut(&grant.flow) {
            Some(flow) => match flow.in_flight.as_mut() {
                Some(tb) if tb.rv >= max_retx => false,
                Some(tb) => {
                    tb.rv += 1;
                    true
                }
                None => return Vec::new(),
            },
            None => return Vec::new(),
        };
        if retries_left {
            self.state.insert(grant.tx, MacState::Retransmit);
            return Vec::new();
        }
        log::error!(
            "flow {}: transport block dropped after {} retransmissions",
            grant.flow,
            max_retx
        );
        self.resolve_in_flight(grant, MacState::Idle, |flow| {
            vec![MacNotification::DeliveryFailure {
                flow,
                bytes: grant.tb_bytes,
            }]
        })
    }

    /// Remove the in-flight block, deduct its bytes from the buffer and
    /// move the transmitter to `next_state`.
    fn resolve_in_flight(
        &mut self,
        grant: &SchedulingGrant,
        next_state: MacState,
        notify: impl FnOnce(FlowId) -> Vec<MacNotification>,
    ) -> Vec<MacNotification> {
        if let Some(flow) = self.flows.get_mut(&grant.flow) {
            if let Some(tb) = flow.in_flight.take() {
                flow.buffer_bytes = flow.buffer_bytes.saturating_sub(tb.bytes as u64);
            }
        }
        self.state.insert(grant.tx, next_state);
        notify(grant.flow)
    }
}
