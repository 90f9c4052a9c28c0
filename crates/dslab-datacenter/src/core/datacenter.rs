//! Datacenter component orchestrating hosts, guests and network.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::json;

use dslab_core::{cast, log_debug, log_error, log_info, log_trace, log_warn};
use dslab_core::{Event, EventHandler, SimulationContext};

use crate::core::allocation_policy::{AllocationPolicy, GuestSnapshot, HostSnapshot, MigrationEntry};
use crate::core::cloudlet::{Cloudlet, CloudletRecord};
use crate::core::common::{AllocationVerdict, GuestDemand, HostEntity, NetworkedEntity, PowerAware};
use crate::core::config::sim_config::SimulationConfig;
use crate::core::energy_meter::{EnergyMeter, EnergyRecord};
use crate::core::error::{ConfigurationError, MigrationInconsistency, RoutingError};
use crate::core::events::cloudlet::CloudletSubmit;
use crate::core::events::guest::{GuestCreateRequest, GuestDestroyRequest};
use crate::core::events::migration::MigrationCompleted;
use crate::core::events::network::{PacketAtHost, PacketAtSwitch, SwitchFlush};
use crate::core::events::processing::{OptimizeAllocation, UpdateProcessing};
use crate::core::guest::{Guest, GuestKind, GuestRegistry, GuestStatus, Placement};
use crate::core::host::{Host, HostStateRecord};
use crate::core::network::packet::{HostPacket, NetworkPacket};
use crate::core::network::switch::SwitchLevel;
use crate::core::network::topology::{Hop, NetworkTopology};
use crate::core::power_model::PowerModel;
use crate::core::resource_pool::ResourcePool;

/// Explicitly requested parent of a guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuestParent {
    Host(u32),
    Guest(u32),
}

#[derive(Clone, Debug)]
struct PendingGuest {
    requested_at: f64,
    parent: Option<GuestParent>,
}

/// Computes migration duration: guest memory (in MB) is transferred using half of the target host bandwidth
/// (in bits per second).
pub fn migration_duration(ram: u64, target_bandwidth: u64) -> f64 {
    if target_bandwidth == 0 {
        return 0.;
    }
    ram as f64 * 8e6 / (target_bandwidth as f64 / 2.)
}

/// Datacenter component.
///
/// Owns hosts, guests and the switch network, periodically updates host processing, integrates power into energy
/// and applies migration plans produced by the allocation policy.
pub struct Datacenter {
    hosts: IndexMap<u32, Host>,
    topology: NetworkTopology,
    guests: GuestRegistry,
    bindings: BTreeMap<u32, u32>,
    submitted_cloudlets: BTreeMap<u32, (Cloudlet, u32)>,
    finished_cloudlets: BTreeMap<u32, CloudletRecord>,
    pending: BTreeMap<u32, PendingGuest>,
    explicit_parents: BTreeMap<u32, GuestParent>,
    unplaceable: BTreeSet<u32>,
    used_guests: BTreeSet<u32>,
    migrations_in_flight: BTreeSet<u32>,
    vm_policy: Box<dyn AllocationPolicy>,
    container_policy: Box<dyn AllocationPolicy>,
    energy_meter: EnergyMeter,
    energy_history: Vec<EnergyRecord>,
    total_data_transfer: u64,
    delivered_packets: Vec<HostPacket>,
    migration_count: u64,
    rejected_migration_count: u64,
    dropped_packet_count: u64,
    next_guest_id: u32,
    next_cloudlet_id: u32,
    tick_armed: bool,
    optimization_armed: bool,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl Datacenter {
    pub fn new(
        vm_policy: Box<dyn AllocationPolicy>,
        container_policy: Box<dyn AllocationPolicy>,
        ctx: SimulationContext,
        sim_config: Rc<SimulationConfig>,
    ) -> Self {
        Self {
            hosts: IndexMap::new(),
            topology: NetworkTopology::new(),
            guests: GuestRegistry::new(),
            bindings: BTreeMap::new(),
            submitted_cloudlets: BTreeMap::new(),
            finished_cloudlets: BTreeMap::new(),
            pending: BTreeMap::new(),
            explicit_parents: BTreeMap::new(),
            unplaceable: BTreeSet::new(),
            used_guests: BTreeSet::new(),
            migrations_in_flight: BTreeSet::new(),
            vm_policy,
            container_policy,
            energy_meter: EnergyMeter::new(),
            energy_history: Vec::new(),
            total_data_transfer: 0,
            delivered_packets: Vec::new(),
            migration_count: 0,
            rejected_migration_count: 0,
            dropped_packet_count: 0,
            next_guest_id: 0,
            next_cloudlet_id: 0,
            tick_armed: false,
            optimization_armed: false,
            ctx,
            sim_config,
        }
    }

    pub fn id(&self) -> u32 {
        self.ctx.id()
    }

    // CONFIGURATION ///////////////////////////////////////////////////////////////////////////////

    /// Adds host and returns its ID. Hosts are numbered in order of addition.
    pub fn add_host(&mut self, name: &str, pool: ResourcePool, power_model: Box<dyn PowerModel>) -> u32 {
        let id = self.hosts.len() as u32;
        self.hosts.insert(id, Host::new(id, name, pool, power_model));
        self.topology.register_host(id);
        log_debug!(self.ctx, "added host #{} ({})", id, name);
        id
    }

    pub fn add_switch(
        &mut self,
        name: &str,
        level: SwitchLevel,
        port_count: u32,
        uplink_bandwidth: f64,
        downlink_bandwidth: f64,
    ) -> u32 {
        self.topology.add_switch(
            name,
            level,
            port_count,
            uplink_bandwidth,
            downlink_bandwidth,
            self.sim_config.switching_delay,
        )
    }

    pub fn attach_host(&mut self, switch_id: u32, host_id: u32) -> Result<(), ConfigurationError> {
        self.topology.attach_host(switch_id, host_id)?;
        let host = self
            .hosts
            .get_mut(&host_id)
            .ok_or(ConfigurationError::UnknownHost(host_id))?;
        host.set_edge_switch(switch_id);
        Ok(())
    }

    pub fn attach_switches(&mut self, first: u32, second: u32) -> Result<(), ConfigurationError> {
        self.topology.attach_switches(first, second)
    }

    /// Registers guest, it is placed when the create request is processed.
    pub fn register_guest(
        &mut self,
        kind: GuestKind,
        owner: u32,
        mut demand: GuestDemand,
        parent: Option<GuestParent>,
    ) -> u32 {
        let id = self.next_guest_id;
        self.next_guest_id += 1;
        demand.id = id;
        self.guests.insert(Guest::new(kind, owner, demand));
        if let Some(parent) = parent {
            self.explicit_parents.insert(id, parent);
        }
        id
    }

    /// Returns a fresh cloudlet ID.
    pub fn next_cloudlet_id(&mut self) -> u32 {
        let id = self.next_cloudlet_id;
        self.next_cloudlet_id += 1;
        id
    }

    /// Stores the cloudlet until its submit event is processed.
    pub fn add_cloudlet(&mut self, cloudlet: Cloudlet, guest_id: u32) {
        self.next_cloudlet_id = self.next_cloudlet_id.max(cloudlet.id + 1);
        self.submitted_cloudlets.insert(cloudlet.id, (cloudlet, guest_id));
    }

    // TICKS ///////////////////////////////////////////////////////////////////////////////////////

    fn time_limit_reached(&self) -> bool {
        matches!(self.sim_config.max_simulation_time, Some(limit) if self.ctx.time() >= limit)
    }

    fn has_work(&self) -> bool {
        if self.time_limit_reached() {
            return false;
        }
        !self.pending.is_empty()
            || !self.migrations_in_flight.is_empty()
            || !self.submitted_cloudlets.is_empty()
            || self
                .guests
                .iter()
                .any(|g| g.status() == GuestStatus::Running && g.cloudlet_scheduler().has_unfinished())
    }

    fn ensure_ticks(&mut self) {
        if self.time_limit_reached() {
            return;
        }
        if !self.tick_armed {
            self.tick_armed = true;
            self.ctx.emit_self_now(UpdateProcessing {});
        }
        if self.vm_policy.supports_migration() && !self.optimization_armed {
            self.optimization_armed = true;
            self.ctx
                .emit_self(OptimizeAllocation {}, self.sim_config.optimization_interval);
        }
    }

    fn on_update_processing(&mut self) {
        self.tick_armed = false;
        let time = self.ctx.time();
        let mut total_power = 0.;
        let host_ids: Vec<u32> = self.hosts.keys().copied().collect();
        for host_id in host_ids {
            let result = match self.hosts.get_mut(&host_id) {
                Some(host) => host.update_processing(
                    time,
                    &mut self.guests,
                    &self.bindings,
                    self.sim_config.virtualization_overhead,
                ),
                None => continue,
            };
            let update = match result {
                Ok(update) => update,
                Err(e) => self.routing_violation(e),
            };
            self.total_data_transfer += update.bytes_sent;
            for (packet, e) in update.dropped {
                self.drop_packet(&packet, &e.to_string());
            }
            for outbound in update.outbound {
                log_trace!(
                    self.ctx,
                    "packet from guest #{} to guest #{} leaves host #{} with delay {}",
                    outbound.packet.packet.sender_guest,
                    outbound.packet.packet.receiver_guest,
                    host_id,
                    outbound.delay
                );
                self.ctx.emit_self(
                    PacketAtSwitch {
                        switch_id: outbound.switch_id,
                        packet: outbound.packet,
                    },
                    outbound.delay,
                );
            }
            if let Some(host) = self.hosts.get(&host_id) {
                total_power += host.current_power();
            }
        }
        self.energy_meter.update(time, total_power);
        let record = EnergyRecord {
            time,
            energy: self.energy_meter.energy_consumed(),
        };
        match self.energy_history.last_mut() {
            Some(last) if last.time == time => *last = record,
            _ => self.energy_history.push(record),
        }

        if self.sim_config.destroy_finished_guests {
            self.destroy_finished_guests();
        }

        if self.has_work() {
            let mut delay = self.sim_config.scheduling_interval;
            if let Some(limit) = self.sim_config.max_simulation_time {
                delay = delay.min(limit - time);
            }
            self.tick_armed = true;
            self.ctx.emit_self(UpdateProcessing {}, delay);
        } else if self.time_limit_reached() {
            log_info!(self.ctx, "simulation time limit reached, processing updates stopped");
        }
    }

    fn routing_violation(&self, error: RoutingError) -> ! {
        log_error!(self.ctx, "routing invariant violated: {}", error);
        panic!("{}\nstate: {}", error, self.dump_state());
    }

    /// Serializes current placement and network state, used for diagnostics of fatal errors.
    pub fn dump_state(&self) -> String {
        let hosts: Vec<_> = self
            .hosts
            .values()
            .map(|h| {
                json!({
                    "id": h.id,
                    "name": h.name,
                    "guests": h.guest_ids(),
                    "edge_switch": h.edge_switch(),
                    "utilization": h.utilization_with_migrations(),
                    "nics": h.nics().collect::<Vec<_>>(),
                })
            })
            .collect();
        let guests: Vec<_> = self
            .guests
            .iter()
            .map(|g| {
                json!({
                    "id": g.id,
                    "kind": g.kind,
                    "status": g.status(),
                    "placement": g.placement(),
                    "in_migration": g.is_in_migration(),
                })
            })
            .collect();
        let state = json!({
            "time": self.ctx.time(),
            "hosts": hosts,
            "guests": guests,
            "topology": self.topology,
        });
        serde_json::to_string_pretty(&state).unwrap_or_else(|e| format!("<can't serialize state: {}>", e))
    }

    fn destroy_finished_guests(&mut self) {
        loop {
            let finished: Vec<u32> = self
                .guests
                .iter()
                .filter(|g| {
                    g.status() == GuestStatus::Running
                        && !g.is_in_migration()
                        && g.children().is_empty()
                        && self.used_guests.contains(&g.id)
                        && !g.cloudlet_scheduler().has_unfinished()
                        && !self.submitted_cloudlets.values().any(|(_, guest_id)| *guest_id == g.id)
                })
                .map(|g| g.id)
                .collect();
            if finished.is_empty() {
                break;
            }
            for guest_id in finished {
                log_debug!(self.ctx, "guest #{} finished its work", guest_id);
                self.destroy_guest(guest_id);
            }
        }
    }

    // GUEST LIFECYCLE /////////////////////////////////////////////////////////////////////////////

    fn on_guest_create_request(&mut self, guest_id: u32) {
        let time = self.ctx.time();
        match self.guests.get(guest_id).map(|g| g.status()) {
            Some(GuestStatus::Pending) => {}
            _ => {
                log_trace!(self.ctx, "ignore create request for guest #{}", guest_id);
                return;
            }
        }
        let parent = self.explicit_parents.get(&guest_id).copied();
        let requested_at = self
            .pending
            .entry(guest_id)
            .or_insert(PendingGuest {
                requested_at: time,
                parent,
            })
            .requested_at;

        if self.try_place(guest_id) {
            self.pending.remove(&guest_id);
        } else if time - requested_at >= self.sim_config.guest_allocation_timeout {
            self.fail_allocation(guest_id);
        } else {
            log_debug!(
                self.ctx,
                "no suitable place for guest #{}, retry in {}",
                guest_id,
                self.sim_config.allocation_retry_period
            );
            self.ctx
                .emit_self(GuestCreateRequest { guest_id }, self.sim_config.allocation_retry_period);
        }
        self.ensure_ticks();
    }

    /// Finds a place for the guest and places it there. Returns false if there is no place.
    fn try_place(&mut self, guest_id: u32) -> bool {
        let (kind, demand) = match self.guests.get(guest_id) {
            Some(guest) => (guest.kind, guest.demand().clone()),
            None => return false,
        };
        let parent = self
            .pending
            .get(&guest_id)
            .and_then(|p| p.parent)
            .or_else(|| match kind {
                GuestKind::VirtualMachine => {
                    let hosts: Vec<&dyn HostEntity> = self.hosts.values().map(|h| h as &dyn HostEntity).collect();
                    self.vm_policy
                        .find_host_for_guest(&demand, &hosts)
                        .map(GuestParent::Host)
                }
                GuestKind::Container => {
                    let vms: Vec<&dyn HostEntity> = self
                        .guests
                        .iter()
                        .filter(|g| {
                            g.kind == GuestKind::VirtualMachine
                                && g.status() == GuestStatus::Running
                                && !g.is_in_migration()
                        })
                        .map(|g| g as &dyn HostEntity)
                        .collect();
                    self.container_policy
                        .find_host_for_guest(&demand, &vms)
                        .map(GuestParent::Guest)
                }
            });

        let placement = match parent {
            Some(GuestParent::Host(host_id)) => match self.hosts.get_mut(&host_id) {
                Some(host) => {
                    if host.guest_create(&demand) != AllocationVerdict::Success {
                        return false;
                    }
                    Placement::Physical(host_id)
                }
                None => return false,
            },
            Some(GuestParent::Guest(parent_id)) => {
                if parent_id == guest_id || self.guests.resolve_physical_host(parent_id).is_err() {
                    return false;
                }
                match self.guests.get_mut(parent_id) {
                    Some(parent) if parent.status() == GuestStatus::Running => match parent.pool_mut() {
                        Some(pool) => {
                            if pool.guest_create(&demand) != AllocationVerdict::Success {
                                return false;
                            }
                            Placement::Virtual(parent_id)
                        }
                        None => return false,
                    },
                    _ => return false,
                }
            }
            None => return false,
        };

        if let Placement::Virtual(parent_id) = placement {
            self.used_guests.insert(parent_id);
        }
        let time = self.ctx.time();
        if let Some(guest) = self.guests.get_mut(guest_id) {
            guest.set_placement(Some(placement));
            guest.set_status(GuestStatus::Running);
            guest.cloudlet_scheduler_mut().start_all(time);
        }
        match self.guests.resolve_physical_host(guest_id) {
            Ok(host_id) => {
                if let Some(host) = self.hosts.get_mut(&host_id) {
                    host.ensure_nic(guest_id);
                }
                log_debug!(
                    self.ctx,
                    "guest #{} placed at {:?} on host #{}",
                    guest_id,
                    placement,
                    host_id
                );
            }
            Err(e) => log_warn!(self.ctx, "placed guest #{} can't be resolved: {}", guest_id, e),
        }
        true
    }

    fn fail_allocation(&mut self, guest_id: u32) {
        let time = self.ctx.time();
        self.pending.remove(&guest_id);
        self.unplaceable.insert(guest_id);
        if let Some(guest) = self.guests.get_mut(guest_id) {
            guest.set_status(GuestStatus::FailedToAllocate);
            guest.cloudlet_scheduler_mut().fail_all(time);
        }
        log_warn!(
            self.ctx,
            "guest #{} failed to allocate after {} seconds",
            guest_id,
            self.sim_config.guest_allocation_timeout
        );
    }

    fn on_guest_destroy_request(&mut self, guest_id: u32) {
        if !self.guests.contains(guest_id) {
            log_trace!(self.ctx, "guest #{} is already gone", guest_id);
            return;
        }
        self.destroy_guest(guest_id);
    }

    /// Destroys the guest together with all nested guests, unfinished cloudlets fail.
    fn destroy_guest(&mut self, guest_id: u32) {
        let time = self.ctx.time();
        let physical_host = self.guests.resolve_physical_host(guest_id).ok();
        let mut subtree = self.guests.subtree(guest_id);
        subtree.reverse();
        for id in subtree {
            let mut guest = match self.guests.remove(id) {
                Some(guest) => guest,
                None => continue,
            };
            guest.cloudlet_scheduler_mut().fail_all(time);
            for record in guest.cloudlet_scheduler().records() {
                self.finished_cloudlets.insert(record.id, record);
            }
            match guest.placement() {
                Some(Placement::Physical(host_id)) => {
                    if let Some(host) = self.hosts.get_mut(&host_id) {
                        host.guest_destroy(id);
                    }
                }
                Some(Placement::Virtual(parent_id)) => {
                    if let Some(pool) = self.guests.get_mut(parent_id).and_then(|p| p.pool_mut()) {
                        pool.guest_destroy(id);
                    }
                }
                None => {}
            }
            if let Some(target) = guest.migration_target() {
                if let Some(host) = self.hosts.get_mut(&target) {
                    host.guest_destroy(id);
                }
            }
            if let Some(host) = physical_host.and_then(|h| self.hosts.get_mut(&h)) {
                host.take_nic(id);
            }
            self.pending.remove(&id);
            self.migrations_in_flight.remove(&id);
            self.explicit_parents.remove(&id);
            guest.set_status(GuestStatus::Destroyed);
            log_debug!(self.ctx, "guest #{} destroyed", id);
        }
    }

    // CLOUDLETS ///////////////////////////////////////////////////////////////////////////////////

    fn on_cloudlet_submit(&mut self, cloudlet_id: u32, guest_id: u32) {
        let time = self.ctx.time();
        let mut cloudlet = match self.submitted_cloudlets.remove(&cloudlet_id) {
            Some((cloudlet, _)) => cloudlet,
            None => {
                log_warn!(self.ctx, "unknown cloudlet #{} submitted", cloudlet_id);
                return;
            }
        };
        self.bindings.insert(cloudlet_id, guest_id);
        match self.guests.get_mut(guest_id) {
            Some(guest) if guest.status() != GuestStatus::FailedToAllocate => {
                let running = guest.status() == GuestStatus::Running;
                guest
                    .cloudlet_scheduler_mut()
                    .submit(cloudlet, guest_id, time, running);
                self.used_guests.insert(guest_id);
                log_debug!(self.ctx, "cloudlet #{} submitted to guest #{}", cloudlet_id, guest_id);
            }
            _ => {
                cloudlet.submit(guest_id, time);
                cloudlet.fail(time);
                self.finished_cloudlets.insert(cloudlet_id, cloudlet.record());
                log_warn!(
                    self.ctx,
                    "cloudlet #{} submitted to unavailable guest #{}",
                    cloudlet_id,
                    guest_id
                );
            }
        }
        self.ensure_ticks();
    }

    // MIGRATION ///////////////////////////////////////////////////////////////////////////////////

    fn on_optimize_allocation(&mut self) {
        self.optimization_armed = false;
        if self.time_limit_reached() {
            return;
        }
        let snapshots: Vec<HostSnapshot> = self
            .hosts
            .values()
            .map(|host| HostSnapshot {
                id: host.id,
                pool: host.pool().clone(),
                used_mips: self.projected_mips(host),
                guests: host
                    .pool()
                    .guests()
                    .iter()
                    .filter(|&&id| !host.pool().is_migrating_in(id))
                    .filter_map(|&id| self.guests.get(id))
                    .map(|g| GuestSnapshot {
                        demand: g.demand().clone(),
                        allocated_mips: g.current_allocated_mips(),
                        migratable: !g.is_in_migration(),
                    })
                    .collect(),
            })
            .collect();
        let plan = self.vm_policy.optimize_allocation(&snapshots);
        if !plan.is_empty() {
            log_info!(self.ctx, "applying migration plan with {} entries", plan.len());
        }
        for entry in plan {
            if let Err(e) = self.start_migration(&entry) {
                self.rejected_migration_count += 1;
                log_warn!(self.ctx, "migration of guest #{} dropped: {}", entry.guest_id, e);
            }
        }
        if self.has_work() {
            self.optimization_armed = true;
            self.ctx
                .emit_self(OptimizeAllocation {}, self.sim_config.optimization_interval);
        }
    }

    /// CPU load of the host once migrations in progress are completed.
    fn projected_mips(&self, host: &Host) -> f64 {
        host.pool()
            .guests()
            .iter()
            .filter_map(|&id| self.guests.get(id))
            .filter(|g| !(g.is_in_migration() && g.placement() == Some(Placement::Physical(host.id))))
            .map(|g| g.current_allocated_mips())
            .sum()
    }

    fn start_migration(&mut self, entry: &MigrationEntry) -> Result<(), MigrationInconsistency> {
        let guest_id = entry.guest_id;
        let guest = self
            .guests
            .get(guest_id)
            .ok_or(MigrationInconsistency::GuestNotFound(guest_id))?;
        if guest.is_in_migration() {
            return Err(MigrationInconsistency::AlreadyMigrating(guest_id));
        }
        if guest.placement() != Some(Placement::Physical(entry.source_host))
            || !self.hosts.contains_key(&entry.source_host)
        {
            return Err(MigrationInconsistency::WrongSource {
                guest_id,
                host_id: entry.source_host,
            });
        }
        let demand = guest.demand().clone();
        let allocated_mips = guest.current_allocated_mips();
        if entry.target_host == entry.source_host {
            return Err(MigrationInconsistency::TargetNotSuitable {
                guest_id,
                host_id: entry.target_host,
            });
        }
        let upper = self.vm_policy.overload_threshold();
        let target_load = match self.hosts.get(&entry.target_host) {
            Some(target) => self.projected_mips(target),
            None => return Err(MigrationInconsistency::TargetNotFound(entry.target_host)),
        };
        let target = self
            .hosts
            .get_mut(&entry.target_host)
            .ok_or(MigrationInconsistency::TargetNotFound(entry.target_host))?;
        let total = target.total_mips();
        if total <= 0. || (target_load + allocated_mips) / total > upper {
            return Err(MigrationInconsistency::TargetOverloaded {
                guest_id,
                host_id: entry.target_host,
            });
        }
        if target.can_allocate(&demand) != AllocationVerdict::Success
            || target.guest_create_migrating_in(&demand) != AllocationVerdict::Success
        {
            return Err(MigrationInconsistency::TargetNotSuitable {
                guest_id,
                host_id: entry.target_host,
            });
        }
        let duration = migration_duration(demand.ram, target.pool().bandwidth().capacity());
        if let Some(guest) = self.guests.get_mut(guest_id) {
            guest.start_migration(entry.target_host);
        }
        self.migrations_in_flight.insert(guest_id);
        log_info!(
            self.ctx,
            "guest #{} migrates from host #{} to host #{}, expected duration {}",
            guest_id,
            entry.source_host,
            entry.target_host,
            duration
        );
        self.ctx.emit_self(
            MigrationCompleted {
                guest_id,
                source_host: entry.source_host,
                target_host: entry.target_host,
            },
            duration,
        );
        Ok(())
    }

    fn on_migration_completed(&mut self, guest_id: u32, source_host: u32, target_host: u32) {
        if let Err(e) = self.finish_migration(guest_id, source_host, target_host) {
            self.rejected_migration_count += 1;
            log_warn!(self.ctx, "migration of guest #{} is not completed: {}", guest_id, e);
            self.abort_migration(guest_id, target_host);
        }
    }

    /// Guest stays on the source host, resources reserved on the target are released.
    fn abort_migration(&mut self, guest_id: u32, target_host: u32) {
        match self.guests.get_mut(guest_id) {
            Some(guest) if guest.migration_target() == Some(target_host) => guest.finish_migration(),
            _ => return,
        }
        if let Some(host) = self.hosts.get_mut(&target_host) {
            if host.pool().is_migrating_in(guest_id) {
                host.guest_destroy(guest_id);
            }
        }
    }

    fn finish_migration(
        &mut self,
        guest_id: u32,
        source_host: u32,
        target_host: u32,
    ) -> Result<(), MigrationInconsistency> {
        self.migrations_in_flight.remove(&guest_id);
        let guest = self
            .guests
            .get(guest_id)
            .ok_or(MigrationInconsistency::GuestNotFound(guest_id))?;
        if !guest.is_in_migration() || guest.migration_target() != Some(target_host) {
            return Err(MigrationInconsistency::GuestNotFound(guest_id));
        }
        match self.hosts.get(&target_host) {
            Some(host) if host.pool().contains(guest_id) => {}
            _ => return Err(MigrationInconsistency::TargetNotFound(target_host)),
        }

        let subtree = self.guests.subtree(guest_id);
        let mut nics = Vec::new();
        if let Some(source) = self.hosts.get_mut(&source_host) {
            source.guest_destroy(guest_id);
            for &id in subtree.iter() {
                if let Some(nic) = source.take_nic(id) {
                    nics.push(nic);
                }
            }
        }
        if let Some(target) = self.hosts.get_mut(&target_host) {
            target.pool_mut().finish_migration_in(guest_id);
            for nic in nics {
                target.insert_nic(nic);
            }
            for &id in subtree.iter() {
                target.ensure_nic(id);
            }
        }
        if let Some(guest) = self.guests.get_mut(guest_id) {
            guest.set_placement(Some(Placement::Physical(target_host)));
            guest.finish_migration();
        }
        self.migration_count += 1;
        log_info!(
            self.ctx,
            "guest #{} migrated from host #{} to host #{}",
            guest_id,
            source_host,
            target_host
        );
        Ok(())
    }

    // NETWORK /////////////////////////////////////////////////////////////////////////////////////

    fn drop_packet(&mut self, packet: &HostPacket, reason: &str) {
        self.dropped_packet_count += 1;
        log_warn!(
            self.ctx,
            "packet from guest #{} to guest #{} dropped: {}",
            packet.sender_guest,
            packet.receiver_guest,
            reason
        );
    }

    fn on_packet_at_switch(&mut self, switch_id: u32, packet: NetworkPacket) {
        match self.topology.switch_mut(switch_id) {
            Some(switch) => {
                if switch.enqueue(packet) {
                    self.ctx.emit_self_now(SwitchFlush { switch_id });
                }
            }
            None => self.drop_packet(&packet.packet, &format!("unknown switch #{}", switch_id)),
        }
    }

    fn on_switch_flush(&mut self, switch_id: u32) {
        let (forwarded, unroutable) = self.topology.flush_switch(switch_id);
        for (packet, e) in unroutable {
            self.drop_packet(&packet.packet, &e.to_string());
        }
        for f in forwarded {
            match f.hop {
                Hop::Switch(next) => self.ctx.emit_self(
                    PacketAtSwitch {
                        switch_id: next,
                        packet: f.packet,
                    },
                    f.delay,
                ),
                Hop::Host(host_id) => self.ctx.emit_self(
                    PacketAtHost {
                        host_id,
                        packet: f.packet,
                    },
                    f.delay,
                ),
            };
        }
    }

    fn on_packet_at_host(&mut self, host_id: u32, packet: NetworkPacket) {
        let time = self.ctx.time();
        let receiver = packet.packet.receiver_guest;
        if self.guests.resolve_physical_host(receiver).ok() != Some(host_id) {
            self.drop_packet(
                &packet.packet,
                &format!("receiver is not running on host #{}", host_id),
            );
            return;
        }
        let mut delivered = packet.packet.clone();
        delivered.recv_time = Some(time);
        let received = match self.hosts.get_mut(&host_id) {
            Some(host) => host.receive(packet.packet, time),
            None => false,
        };
        if received {
            log_trace!(
                self.ctx,
                "packet from guest #{} delivered to guest #{}",
                delivered.sender_guest,
                receiver
            );
            self.delivered_packets.push(delivered);
        } else {
            self.drop_packet(&delivered, &format!("host #{} can't receive packet", host_id));
        }
    }

    // RESULTS /////////////////////////////////////////////////////////////////////////////////////

    pub fn host(&self, host_id: u32) -> Option<&Host> {
        self.hosts.get(&host_id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn guest(&self, guest_id: u32) -> Option<&Guest> {
        self.guests.get(guest_id)
    }

    /// Returns the physical host running the guest.
    pub fn guest_host(&self, guest_id: u32) -> Option<u32> {
        self.guests.resolve_physical_host(guest_id).ok()
    }

    pub fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    /// Records of all known cloudlets ordered by ID.
    pub fn cloudlet_records(&self) -> Vec<CloudletRecord> {
        let mut records = self.finished_cloudlets.clone();
        for guest in self.guests.iter() {
            for record in guest.cloudlet_scheduler().records() {
                records.insert(record.id, record);
            }
        }
        for (cloudlet, _) in self.submitted_cloudlets.values() {
            records.insert(cloudlet.id, cloudlet.record());
        }
        records.into_values().collect()
    }

    pub fn cloudlet_record(&self, cloudlet_id: u32) -> Option<CloudletRecord> {
        self.cloudlet_records().into_iter().find(|r| r.id == cloudlet_id)
    }

    /// Total energy consumed by hosts in Joules.
    pub fn energy_consumed(&self) -> f64 {
        self.energy_meter.energy_consumed()
    }

    /// Cumulative energy consumption sampled at processing updates.
    pub fn energy_history(&self) -> &[EnergyRecord] {
        &self.energy_history
    }

    /// Total bytes sent between hosts.
    pub fn total_data_transfer(&self) -> u64 {
        self.total_data_transfer
    }

    pub fn host_utilization_history(&self, host_id: u32) -> &[HostStateRecord] {
        self.hosts.get(&host_id).map_or(&[], |h| h.state_history())
    }

    /// Packets delivered to hosts through the network.
    pub fn delivered_packets(&self) -> &[HostPacket] {
        &self.delivered_packets
    }

    pub fn migration_count(&self) -> u64 {
        self.migration_count
    }

    pub fn rejected_migration_count(&self) -> u64 {
        self.rejected_migration_count
    }

    pub fn dropped_packet_count(&self) -> u64 {
        self.dropped_packet_count
    }

    /// Guests which failed to allocate.
    pub fn unplaceable_guests(&self) -> Vec<u32> {
        self.unplaceable.iter().copied().collect()
    }
}

impl EventHandler for Datacenter {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            UpdateProcessing {} => {
                self.on_update_processing();
            }
            OptimizeAllocation {} => {
                self.on_optimize_allocation();
            }
            GuestCreateRequest { guest_id } => {
                self.on_guest_create_request(guest_id);
            }
            GuestDestroyRequest { guest_id } => {
                self.on_guest_destroy_request(guest_id);
            }
            CloudletSubmit { cloudlet_id, guest_id } => {
                self.on_cloudlet_submit(cloudlet_id, guest_id);
            }
            MigrationCompleted {
                guest_id,
                source_host,
                target_host,
            } => {
                self.on_migration_completed(guest_id, source_host, target_host);
            }
            PacketAtSwitch { switch_id, packet } => {
                self.on_packet_at_switch(switch_id, packet);
            }
            SwitchFlush { switch_id } => {
                self.on_switch_flush(switch_id);
            }
            PacketAtHost { host_id, packet } => {
                self.on_packet_at_host(host_id, packet);
            }
        })
    }
}
