//! Network switches.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigurationError;
use crate::core::network::packet::NetworkPacket;

/// Level of a switch in the datacenter network tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchLevel {
    Edge,
    Aggregate,
    Root,
}

impl SwitchLevel {
    /// Returns the level directly above this one.
    pub fn upper(&self) -> Option<SwitchLevel> {
        match self {
            SwitchLevel::Edge => Some(SwitchLevel::Aggregate),
            SwitchLevel::Aggregate => Some(SwitchLevel::Root),
            SwitchLevel::Root => None,
        }
    }
}

impl Display for SwitchLevel {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let name = match self {
            SwitchLevel::Edge => "edge",
            SwitchLevel::Aggregate => "aggregate",
            SwitchLevel::Root => "root",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SwitchLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "edge" => Ok(SwitchLevel::Edge),
            "aggregate" | "aggr" => Ok(SwitchLevel::Aggregate),
            "root" | "core" => Ok(SwitchLevel::Root),
            _ => Err(ConfigurationError::InvalidConfig(format!("unknown switch level: {}", s))),
        }
    }
}

/// Network switch.
///
/// Bandwidths are in bits per second, the switching delay is in seconds.
#[derive(Clone, Debug, Serialize)]
pub struct Switch {
    pub id: u32,
    pub name: String,
    pub level: SwitchLevel,
    pub port_count: u32,
    pub uplink_bandwidth: f64,
    pub downlink_bandwidth: f64,
    pub switching_delay: f64,
    uplinks: BTreeSet<u32>,
    downlinks: BTreeSet<u32>,
    hosts: BTreeSet<u32>,
    #[serde(skip)]
    buffer: Vec<NetworkPacket>,
    flush_scheduled: bool,
    forwarded_packets: u64,
}

impl Switch {
    pub fn new(
        id: u32,
        name: &str,
        level: SwitchLevel,
        port_count: u32,
        uplink_bandwidth: f64,
        downlink_bandwidth: f64,
        switching_delay: f64,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            level,
            port_count,
            uplink_bandwidth,
            downlink_bandwidth,
            switching_delay,
            uplinks: BTreeSet::new(),
            downlinks: BTreeSet::new(),
            hosts: BTreeSet::new(),
            buffer: Vec::new(),
            flush_scheduled: false,
            forwarded_packets: 0,
        }
    }

    pub fn uplinks(&self) -> &BTreeSet<u32> {
        &self.uplinks
    }

    pub fn downlinks(&self) -> &BTreeSet<u32> {
        &self.downlinks
    }

    pub fn hosts(&self) -> &BTreeSet<u32> {
        &self.hosts
    }

    /// Number of occupied downward ports.
    pub fn used_ports(&self) -> u32 {
        (self.downlinks.len() + self.hosts.len()) as u32
    }

    pub(crate) fn add_uplink(&mut self, switch_id: u32) {
        self.uplinks.insert(switch_id);
    }

    pub(crate) fn add_downlink(&mut self, switch_id: u32) {
        self.downlinks.insert(switch_id);
    }

    pub(crate) fn add_host(&mut self, host_id: u32) {
        self.hosts.insert(host_id);
    }

    /// Buffers the packet which arrived at the current time. Returns true if a flush has to be scheduled.
    pub(crate) fn enqueue(&mut self, packet: NetworkPacket) -> bool {
        self.buffer.push(packet);
        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Takes all buffered packets.
    pub(crate) fn take_buffer(&mut self) -> Vec<NetworkPacket> {
        self.flush_scheduled = false;
        let packets = std::mem::take(&mut self.buffer);
        self.forwarded_packets += packets.len() as u64;
        packets
    }

    pub fn forwarded_packets(&self) -> u64 {
        self.forwarded_packets
    }
}
