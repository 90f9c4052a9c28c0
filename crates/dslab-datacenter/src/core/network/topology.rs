//! Switch hierarchy and routing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::error::{ConfigurationError, RoutingError};
use crate::core::network::packet::NetworkPacket;
use crate::core::network::switch::{Switch, SwitchLevel};

/// Next element on the packet path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Hop {
    Host(u32),
    Switch(u32),
}

/// Where the packet goes from a switch and which link bandwidth it uses.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Route {
    pub hop: Hop,
    pub bandwidth: f64,
}

/// Packet leaving a switch.
#[derive(Clone, Debug, Serialize)]
pub struct ForwardedPacket {
    pub hop: Hop,
    pub packet: NetworkPacket,
    pub delay: f64,
}

/// Datacenter network built of edge, aggregate and root switches.
///
/// Hosts are attached to edge switches, edge switches to aggregate switches and aggregate switches to root
/// switches. Any other link is rejected.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NetworkTopology {
    switches: BTreeMap<u32, Switch>,
    hosts: BTreeSet<u32>,
    host_edges: BTreeMap<u32, u32>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds switch and returns its ID.
    pub fn add_switch(
        &mut self,
        name: &str,
        level: SwitchLevel,
        port_count: u32,
        uplink_bandwidth: f64,
        downlink_bandwidth: f64,
        switching_delay: f64,
    ) -> u32 {
        let id = self.switches.len() as u32;
        self.switches.insert(
            id,
            Switch::new(
                id,
                name,
                level,
                port_count,
                uplink_bandwidth,
                downlink_bandwidth,
                switching_delay,
            ),
        );
        id
    }

    /// Makes host known to the network, so that it can be attached to a switch.
    pub fn register_host(&mut self, host_id: u32) {
        self.hosts.insert(host_id);
    }

    pub fn switch(&self, switch_id: u32) -> Option<&Switch> {
        self.switches.get(&switch_id)
    }

    pub fn switch_mut(&mut self, switch_id: u32) -> Option<&mut Switch> {
        self.switches.get_mut(&switch_id)
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch> {
        self.switches.values()
    }

    pub fn switch_by_name(&self, name: &str) -> Option<&Switch> {
        self.switches.values().find(|s| s.name == name)
    }

    /// Returns the edge switch the host is attached to.
    pub fn host_edge(&self, host_id: u32) -> Option<u32> {
        self.host_edges.get(&host_id).copied()
    }

    /// Connects host to edge switch. Attaching already connected host to the same switch does nothing.
    pub fn attach_host(&mut self, switch_id: u32, host_id: u32) -> Result<(), ConfigurationError> {
        if !self.hosts.contains(&host_id) {
            return Err(ConfigurationError::UnknownHost(host_id));
        }
        let switch = self
            .switches
            .get_mut(&switch_id)
            .ok_or(ConfigurationError::UnknownSwitch(switch_id))?;
        if switch.level != SwitchLevel::Edge {
            return Err(ConfigurationError::HostAttachedToNonEdge {
                switch_id,
                level: switch.level,
            });
        }
        match self.host_edges.get(&host_id) {
            Some(&edge) if edge == switch_id => return Ok(()),
            Some(&edge) => {
                return Err(ConfigurationError::InvalidConfig(format!(
                    "host #{} is already attached to switch #{}",
                    host_id, edge
                )))
            }
            None => {}
        }
        if switch.used_ports() >= switch.port_count {
            return Err(ConfigurationError::PortLimitExceeded {
                switch_id,
                ports: switch.port_count,
            });
        }
        switch.add_host(host_id);
        self.host_edges.insert(host_id, switch_id);
        Ok(())
    }

    /// Connects two switches at adjacent levels, the order of arguments does not matter.
    /// Connecting already connected switches does nothing.
    pub fn attach_switches(&mut self, first: u32, second: u32) -> Result<(), ConfigurationError> {
        let first_level = self
            .switches
            .get(&first)
            .ok_or(ConfigurationError::UnknownSwitch(first))?
            .level;
        let second_level = self
            .switches
            .get(&second)
            .ok_or(ConfigurationError::UnknownSwitch(second))?
            .level;
        let (lower, upper) = if first_level.upper() == Some(second_level) {
            (first, second)
        } else if second_level.upper() == Some(first_level) {
            (second, first)
        } else {
            return Err(ConfigurationError::IncompatibleSwitchLevels {
                first: first_level,
                second: second_level,
            });
        };

        let upper_switch = self
            .switches
            .get_mut(&upper)
            .ok_or(ConfigurationError::UnknownSwitch(upper))?;
        if upper_switch.downlinks().contains(&lower) {
            return Ok(());
        }
        if upper_switch.used_ports() >= upper_switch.port_count {
            return Err(ConfigurationError::PortLimitExceeded {
                switch_id: upper,
                ports: upper_switch.port_count,
            });
        }
        upper_switch.add_downlink(lower);
        if let Some(lower_switch) = self.switches.get_mut(&lower) {
            lower_switch.add_uplink(upper);
        }
        Ok(())
    }

    /// Computes the next hop of a packet addressed to `receiver_host` which is currently at the switch.
    pub fn route(&self, switch_id: u32, receiver_host: u32) -> Result<Route, RoutingError> {
        let no_route = RoutingError::NoRoute {
            switch_id,
            host_id: receiver_host,
        };
        let switch = self.switches.get(&switch_id).ok_or_else(|| no_route.clone())?;
        let receiver_edge = self.host_edge(receiver_host);
        let down = |hop: Hop| Route {
            hop,
            bandwidth: switch.downlink_bandwidth,
        };
        let up = || {
            switch.uplinks().iter().next().map(|&id| Route {
                hop: Hop::Switch(id),
                bandwidth: switch.uplink_bandwidth,
            })
        };
        let route = match switch.level {
            SwitchLevel::Edge => {
                if switch.hosts().contains(&receiver_host) {
                    Some(down(Hop::Host(receiver_host)))
                } else {
                    up()
                }
            }
            SwitchLevel::Aggregate => match receiver_edge {
                Some(edge) if switch.downlinks().contains(&edge) => Some(down(Hop::Switch(edge))),
                _ => up(),
            },
            SwitchLevel::Root => receiver_edge.and_then(|edge| {
                switch
                    .downlinks()
                    .iter()
                    .find(|aggr| {
                        self.switches
                            .get(aggr)
                            .map_or(false, |aggr| aggr.downlinks().contains(&edge))
                    })
                    .map(|&aggr| down(Hop::Switch(aggr)))
            }),
        };
        route.ok_or(no_route)
    }

    /// Forwards packets buffered at the switch.
    ///
    /// Packets going to the same next hop share the link bandwidth equally, so each of `k` such packets is delayed by
    /// `size / (bandwidth / k) + switching_delay`. Packets without a route are returned separately.
    pub fn flush_switch(&mut self, switch_id: u32) -> (Vec<ForwardedPacket>, Vec<(NetworkPacket, RoutingError)>) {
        let (packets, switching_delay) = match self.switches.get_mut(&switch_id) {
            Some(switch) => (switch.take_buffer(), switch.switching_delay),
            None => return (Vec::new(), Vec::new()),
        };
        let mut routed = Vec::new();
        let mut unroutable = Vec::new();
        for packet in packets {
            match self.route(switch_id, packet.receiver_host) {
                Ok(route) => routed.push((route, packet)),
                Err(e) => unroutable.push((packet, e)),
            }
        }
        let mut per_hop: BTreeMap<(u8, u32), usize> = BTreeMap::new();
        for (route, _) in routed.iter() {
            *per_hop.entry(hop_key(route.hop)).or_insert(0) += 1;
        }
        let forwarded = routed
            .into_iter()
            .map(|(route, packet)| {
                let k = per_hop[&hop_key(route.hop)] as f64;
                let delay = packet.size_bits() / (route.bandwidth / k) + switching_delay;
                ForwardedPacket {
                    hop: route.hop,
                    packet,
                    delay,
                }
            })
            .collect();
        (forwarded, unroutable)
    }
}

fn hop_key(hop: Hop) -> (u8, u32) {
    match hop {
        Hop::Host(id) => (0, id),
        Hop::Switch(id) => (1, id),
    }
}
