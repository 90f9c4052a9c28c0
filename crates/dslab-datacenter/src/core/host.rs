//! Physical host.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::common::{AllocationVerdict, GuestDemand, HostEntity, NetworkedEntity, PowerAware};
use crate::core::energy_meter::EnergyMeter;
use crate::core::error::RoutingError;
use crate::core::guest::{split_request, GuestRegistry, Placement};
use crate::core::network::nic::NetworkInterface;
use crate::core::network::packet::{HostPacket, NetworkPacket};
use crate::core::power_model::PowerModel;
use crate::core::resource_pool::ResourcePool;

/// Share of guest CPU capacity added to the host load while the guest migrates out.
pub const MIGRATION_CPU_OVERHEAD: f64 = 0.9;

/// Host utilization observed at a processing update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostStateRecord {
    pub time: f64,
    pub utilization: f64,
    pub power: f64,
}

/// Packet leaving the host towards its edge switch.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundPacket {
    pub switch_id: u32,
    pub packet: NetworkPacket,
    pub delay: f64,
}

/// Outcome of the network pass made during a processing update.
#[derive(Clone, Debug, Default)]
pub struct HostUpdate {
    pub outbound: Vec<OutboundPacket>,
    pub delivered_locally: usize,
    pub bytes_sent: u64,
    pub dropped: Vec<(HostPacket, RoutingError)>,
}

#[derive(Clone)]
pub struct Host {
    pub id: u32,
    pub name: String,
    pool: ResourcePool,
    power_model: Box<dyn PowerModel>,
    edge_switch: Option<u32>,
    nics: BTreeMap<u32, NetworkInterface>,
    utilization_mips: f64,
    current_power: f64,
    energy_meter: EnergyMeter,
    state_history: Vec<HostStateRecord>,
}

impl Host {
    pub fn new(id: u32, name: &str, pool: ResourcePool, power_model: Box<dyn PowerModel>) -> Self {
        let current_power = power_model.get_power(0.);
        Self {
            id,
            name: name.to_string(),
            pool,
            power_model,
            edge_switch: None,
            nics: BTreeMap::new(),
            utilization_mips: 0.,
            current_power,
            energy_meter: EnergyMeter::new(),
            state_history: Vec::new(),
        }
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ResourcePool {
        &mut self.pool
    }

    /// Places the guest on the host.
    pub fn guest_create(&mut self, demand: &GuestDemand) -> AllocationVerdict {
        let verdict = self.pool.guest_create(demand);
        if verdict == AllocationVerdict::Success {
            self.ensure_nic(demand.id);
        }
        verdict
    }

    /// Reserves resources for the guest arriving by migration.
    pub fn guest_create_migrating_in(&mut self, demand: &GuestDemand) -> AllocationVerdict {
        self.pool.guest_create_migrating_in(demand)
    }

    pub fn guest_destroy(&mut self, guest_id: u32) {
        self.pool.guest_destroy(guest_id);
    }

    pub fn ensure_nic(&mut self, guest_id: u32) {
        self.nics
            .entry(guest_id)
            .or_insert_with(|| NetworkInterface::new(guest_id));
    }

    pub fn nic(&self, guest_id: u32) -> Option<&NetworkInterface> {
        self.nics.get(&guest_id)
    }

    pub fn take_nic(&mut self, guest_id: u32) -> Option<NetworkInterface> {
        self.nics.remove(&guest_id)
    }

    pub fn insert_nic(&mut self, nic: NetworkInterface) {
        self.nics.insert(nic.guest_id, nic);
    }

    /// Delivers packet which came from the network to the receiver guest. Returns false if the receiver is not here.
    pub fn receive(&mut self, mut packet: HostPacket, time: f64) -> bool {
        match self.nics.get_mut(&packet.receiver_guest) {
            Some(nic) => {
                packet.recv_time = Some(time);
                nic.deliver(packet);
                true
            }
            None => false,
        }
    }

    /// Guests running on the host, including nested ones, parents first.
    ///
    /// Guests migrating to the host are not running here yet.
    pub fn resident_guests(&self, guests: &GuestRegistry) -> Vec<u32> {
        self.pool
            .guests()
            .iter()
            .filter(|&&id| !self.pool.is_migrating_in(id))
            .flat_map(|&id| guests.subtree(id))
            .collect()
    }

    /// Updates the host state at `time`.
    ///
    /// Advances cloudlets of resident guests, sends packets queued by them, reallocates PEs according to the current
    /// guest demand and samples the host power.
    ///
    /// Returns an error if a queued packet is sent by a guest not running on the host.
    pub fn update_processing(
        &mut self,
        time: f64,
        guests: &mut GuestRegistry,
        bindings: &BTreeMap<u32, u32>,
        virtualization_overhead: f64,
    ) -> Result<HostUpdate, RoutingError> {
        let resident = self.resident_guests(guests);

        for &guest_id in resident.iter() {
            self.ensure_nic(guest_id);
            if let Some(guest) = guests.get_mut(guest_id) {
                let scheduler = guest.cloudlet_scheduler_mut();
                scheduler.update_progress(time);
                scheduler.set_host(self.id);
            }
        }
        self.process_stages(time, &resident, guests, bindings);

        let update = self.send_packets(time, &resident, guests, virtualization_overhead)?;
        if update.delivered_locally > 0 {
            self.process_stages(time, &resident, guests, bindings);
        }

        self.reallocate(time, guests);
        let utilization = self.utilization_with_migrations();
        self.current_power = self.power_model.get_power(utilization);
        self.energy_meter.update(time, self.current_power);
        let record = HostStateRecord {
            time,
            utilization,
            power: self.current_power,
        };
        match self.state_history.last_mut() {
            Some(last) if last.time == time => *last = record,
            _ => self.state_history.push(record),
        }
        Ok(update)
    }

    fn process_stages(&mut self, time: f64, resident: &[u32], guests: &mut GuestRegistry, bindings: &BTreeMap<u32, u32>) {
        for &guest_id in resident {
            if let (Some(guest), Some(nic)) = (guests.get_mut(guest_id), self.nics.get_mut(&guest_id)) {
                guest
                    .cloudlet_scheduler_mut()
                    .process_stages(time, guest_id, nic, bindings);
            }
        }
    }

    /// Sends packets queued at NICs of resident guests.
    ///
    /// Packets to guests on the same host are delivered immediately. Other packets go to the edge switch, packets of
    /// the same sender share its bandwidth equally.
    fn send_packets(
        &mut self,
        time: f64,
        resident: &[u32],
        guests: &GuestRegistry,
        virtualization_overhead: f64,
    ) -> Result<HostUpdate, RoutingError> {
        let resident_set: BTreeSet<u32> = resident.iter().copied().collect();
        let mut queued = Vec::new();
        for nic in self.nics.values_mut() {
            queued.extend(nic.take_outgoing());
        }

        let mut update = HostUpdate::default();
        let mut remote = Vec::new();
        for mut packet in queued {
            if !resident_set.contains(&packet.sender_guest) {
                return Err(RoutingError::SenderNotFound {
                    guest_id: packet.sender_guest,
                    host_id: self.id,
                });
            }
            let receiver_host = match guests.resolve_physical_host(packet.receiver_guest) {
                Ok(host_id) => host_id,
                Err(_) => {
                    let guest_id = packet.receiver_guest;
                    update.dropped.push((packet, RoutingError::UnknownReceiver { guest_id }));
                    continue;
                }
            };
            let nesting = guests.depth(packet.sender_guest) + guests.depth(packet.receiver_guest) - 2;
            packet.virtualization_overhead += nesting as f64 * virtualization_overhead;
            if receiver_host == self.id {
                if self.receive(packet.clone(), time) {
                    update.delivered_locally += 1;
                } else {
                    let guest_id = packet.receiver_guest;
                    update.dropped.push((packet, RoutingError::UnknownReceiver { guest_id }));
                }
            } else {
                remote.push((receiver_host, packet));
            }
        }

        let mut per_sender: BTreeMap<u32, usize> = BTreeMap::new();
        for (_, packet) in remote.iter() {
            *per_sender.entry(packet.sender_guest).or_insert(0) += 1;
        }
        for (receiver_host, packet) in remote {
            let switch_id = match self.edge_switch {
                Some(switch_id) => switch_id,
                None => {
                    update.dropped.push((packet, RoutingError::HostNotAttached { host_id: self.id }));
                    continue;
                }
            };
            let k = per_sender[&packet.sender_guest] as f64;
            let bandwidth = match guests.get(packet.sender_guest).map(|g| g.demand().bandwidth) {
                Some(bw) if bw > 0 => bw as f64,
                _ => self.pool.bandwidth().capacity() as f64,
            };
            let delay = 8. * packet.data as f64 / (bandwidth / k) + packet.virtualization_overhead;
            update.bytes_sent += packet.data;
            update.outbound.push(OutboundPacket {
                switch_id,
                packet: NetworkPacket::new(self.id, receiver_host, packet),
                delay,
            });
        }
        Ok(update)
    }

    /// Reallocates host PEs among guests according to their current requests.
    fn reallocate(&mut self, time: f64, guests: &mut GuestRegistry) {
        self.pool.guest_scheduler_mut().deallocate_all();
        let direct: Vec<u32> = self.pool.guests().to_vec();
        let mut utilization_mips = 0.;
        for guest_id in direct {
            if self.pool.is_migrating_in(guest_id) {
                continue;
            }
            let demand = match guests.get(guest_id) {
                Some(guest) => guest.demand().clone(),
                None => continue,
            };
            let requested = guests.requested_mips(guest_id, time);
            let granted = self
                .pool
                .guest_scheduler_mut()
                .allocate_pes_for_guest(guest_id, &split_request(requested, &demand));
            guests.distribute(guest_id, time, granted);
            let migrating_out = guests
                .get(guest_id)
                .map_or(false, |g| g.is_in_migration() && g.placement() == Some(Placement::Physical(self.id)));
            utilization_mips += if migrating_out {
                granted / MIGRATION_CPU_OVERHEAD
            } else {
                granted
            };
        }
        self.utilization_mips = utilization_mips;
    }

    /// CPU load used for power and migration decisions, guests migrating out are counted with overhead.
    pub fn utilization_with_migrations(&self) -> f64 {
        let total = self.pool.total_mips();
        if total == 0. {
            return 0.;
        }
        self.utilization_mips / total
    }

    pub fn utilization_mips(&self) -> f64 {
        self.utilization_mips
    }

    pub fn state_history(&self) -> &[HostStateRecord] {
        &self.state_history
    }

    pub fn nics(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.nics.values()
    }
}

impl HostEntity for Host {
    fn id(&self) -> u32 {
        self.id
    }

    fn can_allocate(&self, demand: &GuestDemand) -> AllocationVerdict {
        self.pool.can_allocate(demand)
    }

    fn total_mips(&self) -> f64 {
        self.pool.total_mips()
    }

    fn allocated_mips(&self) -> f64 {
        self.pool.allocated_mips()
    }

    fn guest_ids(&self) -> Vec<u32> {
        self.pool.guests().to_vec()
    }
}

impl NetworkedEntity for Host {
    fn edge_switch(&self) -> Option<u32> {
        self.edge_switch
    }

    fn set_edge_switch(&mut self, switch_id: u32) {
        self.edge_switch = Some(switch_id);
    }
}

impl PowerAware for Host {
    fn current_power(&self) -> f64 {
        self.current_power
    }

    fn energy_consumed(&self) -> f64 {
        self.energy_meter.energy_consumed()
    }
}
