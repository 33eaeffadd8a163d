//! Per-flow delivery statistics, exported as JSON.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::mac::MacNotification;
use crate::scene::FlowId;

#[derive(Debug, Clone, Default)]
struct FlowStats {
    enqueued_bytes: u64,
    delivered_blocks: u64,
    delivered_bytes: u64,
    dropped_blocks: u64,
    dropped_bytes: u64,
    scheduling_delays: u64,
    sinr_db_sum: f64,
}

/// Counters of one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    flows: BTreeMap<FlowId, FlowStats>,
    transmissions: u64,
    retransmissions: u64,
}

impl SimStats {
    pub fn record_enqueue(&mut self, flow: FlowId, bytes: u32) {
        self.flows.entry(flow).or_default().enqueued_bytes += bytes as u64;
    }

    pub fn record_transmission(&mut self, rv: u8) {
        self.transmissions += 1;
        if rv > 0 {
            self.retransmissions += 1;
        }
    }

    pub fn record_notification(&mut self, note: &MacNotification) {
        match *note {
            MacNotification::Delivered {
                flow,
                bytes,
                sinr_db,
            } => {
                let entry = self.flows.entry(flow).or_default();
                entry.delivered_blocks += 1;
                entry.delivered_bytes += bytes as u64;
                entry.sinr_db_sum += sinr_db;
            }
            MacNotification::DeliveryFailure { flow, bytes } => {
                let entry = self.flows.entry(flow).or_default();
                entry.dropped_blocks += 1;
                entry.dropped_bytes += bytes as u64;
            }
            MacNotification::ResourceExhaustion { flow } => {
                self.flows.entry(flow).or_default().scheduling_delays += 1;
            }
        }
    }

    pub fn enqueued_bytes(&self, flow: FlowId) -> u64 {
        self.flows.get(&flow).map_or(0, |f| f.enqueued_bytes)
    }

    pub fn delivered_blocks(&self, flow: FlowId) -> u64 {
        self.flows.get(&flow).map_or(0, |f| f.delivered_blocks)
    }

    pub fn dropped_blocks(&self, flow: FlowId) -> u64 {
        self.flows.get(&flow).map_or(0, |f| f.dropped_blocks)
    }

    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    /// Export every counter as a JSON value.
    pub fn export(&self) -> Value {
        let flows: Vec<Value> = self
            .flows
            .iter()
            .map(|(id, f)| {
                let mean_sinr = if f.delivered_blocks > 0 {
                    Some(f.sinr_db_sum / f.delivered_blocks as f64)
                } else {
                    None
                };
                json!({
                    "flow": id.0,
                    "enqueued_bytes": f.enqueued_bytes,
                    "delivered_blocks": f.delivered_blocks,
                    "delivered_bytes": f.delivered_bytes,
                    "dropped_blocks": f.dropped_blocks,
                    "dropped_bytes": f.dropped_bytes,
                    "scheduling_delays": f.scheduling_delays,
                    "mean_sinr_db": mean_sinr,
                })
            })
            .collect();
        json!({
            "transmissions": self.transmissions,
            "retransmissions": self.retransmissions,
            "flows": flows,
        })
    }
}
