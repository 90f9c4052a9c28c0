//! Guests: virtual machines and containers.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::cloudlet_scheduler::CloudletScheduler;
use crate::core::common::{AllocationVerdict, GuestDemand, HostEntity};
use crate::core::error::PlacementError;
use crate::core::resource_pool::ResourcePool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GuestKind {
    VirtualMachine,
    Container,
}

/// Where the guest runs: directly on a physical host or inside another guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Placement {
    Physical(u32),
    Virtual(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GuestStatus {
    Pending,
    Running,
    FailedToAllocate,
    Destroyed,
}

/// Guest state observed at a processing update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuestStateRecord {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub in_migration: bool,
}

#[derive(Clone)]
pub struct Guest {
    pub id: u32,
    pub owner: u32,
    pub kind: GuestKind,
    demand: GuestDemand,
    status: GuestStatus,
    placement: Option<Placement>,
    pool: Option<ResourcePool>,
    cloudlet_scheduler: CloudletScheduler,
    in_migration: bool,
    migration_target: Option<u32>,
    allocated_mips: f64,
    requested_mips: f64,
    state_history: Vec<GuestStateRecord>,
}

impl Guest {
    pub fn new(kind: GuestKind, owner: u32, demand: GuestDemand) -> Self {
        // only virtual machines can host other guests
        let pool = match kind {
            GuestKind::VirtualMachine => Some(ResourcePool::uniform(
                demand.pes,
                demand.mips_per_pe,
                demand.ram,
                demand.bandwidth,
                demand.storage,
            )),
            GuestKind::Container => None,
        };
        Self {
            id: demand.id,
            owner,
            kind,
            demand,
            status: GuestStatus::Pending,
            placement: None,
            pool,
            cloudlet_scheduler: CloudletScheduler::new(),
            in_migration: false,
            migration_target: None,
            allocated_mips: 0.,
            requested_mips: 0.,
            state_history: Vec::new(),
        }
    }

    pub fn demand(&self) -> &GuestDemand {
        &self.demand
    }

    pub fn status(&self) -> GuestStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: GuestStatus) {
        self.status = status;
    }

    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub(crate) fn set_placement(&mut self, placement: Option<Placement>) {
        self.placement = placement;
    }

    pub fn pool(&self) -> Option<&ResourcePool> {
        self.pool.as_ref()
    }

    pub fn pool_mut(&mut self) -> Option<&mut ResourcePool> {
        self.pool.as_mut()
    }

    /// IDs of guests running inside this one.
    pub fn children(&self) -> Vec<u32> {
        self.pool.as_ref().map(|p| p.guests().to_vec()).unwrap_or_default()
    }

    pub fn cloudlet_scheduler(&self) -> &CloudletScheduler {
        &self.cloudlet_scheduler
    }

    pub fn cloudlet_scheduler_mut(&mut self) -> &mut CloudletScheduler {
        &mut self.cloudlet_scheduler
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub fn migration_target(&self) -> Option<u32> {
        self.migration_target
    }

    pub(crate) fn start_migration(&mut self, target: u32) {
        self.in_migration = true;
        self.migration_target = Some(target);
    }

    pub(crate) fn finish_migration(&mut self) {
        self.in_migration = false;
        self.migration_target = None;
    }

    /// MIPS given to the guest at the latest processing update.
    pub fn current_allocated_mips(&self) -> f64 {
        self.allocated_mips
    }

    pub fn current_requested_mips(&self) -> f64 {
        self.requested_mips
    }

    pub fn state_history(&self) -> &[GuestStateRecord] {
        &self.state_history
    }

    fn record_state(&mut self, time: f64, allocated_mips: f64, requested_mips: f64) {
        self.allocated_mips = allocated_mips;
        self.requested_mips = requested_mips;
        let record = GuestStateRecord {
            time,
            allocated_mips,
            requested_mips,
            in_migration: self.in_migration,
        };
        match self.state_history.last_mut() {
            Some(last) if last.time == time => *last = record,
            _ => self.state_history.push(record),
        }
    }
}

/// A virtual machine hosting containers.
impl HostEntity for Guest {
    fn id(&self) -> u32 {
        self.id
    }

    fn can_allocate(&self, demand: &GuestDemand) -> AllocationVerdict {
        match &self.pool {
            Some(pool) => pool.can_allocate(demand),
            None => AllocationVerdict::NotEnoughPes,
        }
    }

    fn total_mips(&self) -> f64 {
        self.pool.as_ref().map_or(0., |p| p.total_mips())
    }

    fn allocated_mips(&self) -> f64 {
        self.pool.as_ref().map_or(0., |p| p.allocated_mips())
    }

    fn guest_ids(&self) -> Vec<u32> {
        self.children()
    }
}

/// Splits `mips` evenly among the guest PEs, not exceeding the PE rating.
pub(crate) fn split_request(mips: f64, demand: &GuestDemand) -> Vec<f64> {
    if demand.pes == 0 {
        return Vec::new();
    }
    let per_pe = (mips / demand.pes as f64).min(demand.mips_per_pe).max(0.);
    vec![per_pe; demand.pes as usize]
}

/// All guests known to the datacenter.
#[derive(Clone, Default)]
pub struct GuestRegistry {
    guests: BTreeMap<u32, Guest>,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, guest: Guest) {
        self.guests.insert(guest.id, guest);
    }

    pub fn remove(&mut self, guest_id: u32) -> Option<Guest> {
        self.guests.remove(&guest_id)
    }

    pub fn get(&self, guest_id: u32) -> Option<&Guest> {
        self.guests.get(&guest_id)
    }

    pub fn get_mut(&mut self, guest_id: u32) -> Option<&mut Guest> {
        self.guests.get_mut(&guest_id)
    }

    pub fn contains(&self, guest_id: u32) -> bool {
        self.guests.contains_key(&guest_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guest> {
        self.guests.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Guest> {
        self.guests.values_mut()
    }

    pub fn len(&self) -> usize {
        self.guests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guests.is_empty()
    }

    /// Follows placement links up to the physical host running the guest.
    pub fn resolve_physical_host(&self, guest_id: u32) -> Result<u32, PlacementError> {
        let mut visited = BTreeSet::new();
        let mut current = guest_id;
        loop {
            if !visited.insert(current) {
                return Err(PlacementError::Cycle(guest_id));
            }
            let guest = self.guests.get(&current).ok_or(PlacementError::UnknownGuest(current))?;
            match guest.placement {
                Some(Placement::Physical(host_id)) => return Ok(host_id),
                Some(Placement::Virtual(parent)) => current = parent,
                None => return Err(PlacementError::NotPlaced(current)),
            }
        }
    }

    /// Number of virtualization layers between the guest and the hardware, 1 for guests placed on hosts.
    pub fn depth(&self, guest_id: u32) -> usize {
        let mut depth = 1;
        let mut current = guest_id;
        while let Some(Placement::Virtual(parent)) = self.guests.get(&current).and_then(|g| g.placement) {
            depth += 1;
            current = parent;
            if depth > self.guests.len() {
                break;
            }
        }
        depth
    }

    /// Returns the guest and all guests nested into it, parents first.
    pub fn subtree(&self, guest_id: u32) -> Vec<u32> {
        let mut result = Vec::new();
        let mut stack = vec![guest_id];
        let mut visited = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(guest) = self.guests.get(&id) {
                result.push(id);
                let mut children = guest.children();
                children.reverse();
                stack.extend(children);
            }
        }
        result
    }

    /// MIPS requested by the guest for its own cloudlets and nested guests, capped by the guest capacity.
    pub fn requested_mips(&self, guest_id: u32, time: f64) -> f64 {
        self.requested_mips_bounded(guest_id, time, self.guests.len())
    }

    fn requested_mips_bounded(&self, guest_id: u32, time: f64, depth_left: usize) -> f64 {
        let guest = match self.guests.get(&guest_id) {
            Some(guest) => guest,
            None => return 0.,
        };
        let demand = &guest.demand;
        let mut requested = guest
            .cloudlet_scheduler
            .requested_mips(time, demand.pes, demand.mips_per_pe);
        if depth_left > 0 {
            if let Some(pool) = &guest.pool {
                for &child in pool.guests() {
                    if !pool.is_migrating_in(child) {
                        requested += self.requested_mips_bounded(child, time, depth_left - 1);
                    }
                }
            }
        }
        requested.min(demand.total_mips())
    }

    /// Gives `mips` to the guest: shares it among nested guests according to their requests and gives the rest to
    /// the guest's own cloudlets.
    pub fn distribute(&mut self, guest_id: u32, time: f64, mips: f64) {
        self.distribute_bounded(guest_id, time, mips, self.guests.len());
    }

    fn distribute_bounded(&mut self, guest_id: u32, time: f64, mips: f64, depth_left: usize) {
        let (demand, children) = match self.guests.get(&guest_id) {
            Some(guest) => (guest.demand.clone(), guest.children()),
            None => return,
        };
        let requested = self.requested_mips(guest_id, time);
        let own_request = self.guests[&guest_id]
            .cloudlet_scheduler
            .requested_mips(time, demand.pes, demand.mips_per_pe);
        let factor = if requested > 0. { (mips / requested).min(1.) } else { 1. };

        let mut children_mips = 0.;
        if depth_left > 0 && !children.is_empty() {
            let child_requests: Vec<(u32, f64, Vec<f64>)> = children
                .iter()
                .filter_map(|&child| {
                    let child_demand = self.guests.get(&child)?.demand.clone();
                    let request = self.requested_mips(child, time) * factor;
                    Some((child, request, split_request(request, &child_demand)))
                })
                .collect();
            let mut granted = Vec::new();
            if let Some(pool) = self.guests.get_mut(&guest_id).and_then(|g| g.pool.as_mut()) {
                pool.guest_scheduler_mut().deallocate_all();
                for (child, _, request) in child_requests.iter() {
                    if pool.is_migrating_in(*child) {
                        continue;
                    }
                    granted.push((*child, pool.guest_scheduler_mut().allocate_pes_for_guest(*child, request)));
                }
            }
            for (child, child_mips) in granted {
                children_mips += child_mips;
                self.distribute_bounded(child, time, child_mips, depth_left - 1);
            }
        }

        if let Some(guest) = self.guests.get_mut(&guest_id) {
            let own_mips = (mips - children_mips).max(0.).min(own_request);
            guest
                .cloudlet_scheduler
                .allocate(time, own_mips, demand.pes, demand.mips_per_pe);
            guest.record_state(time, mips, requested);
        }
    }
}
