//! Resource pool state.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::common::{AllocationVerdict, GuestDemand};
use crate::core::guest_scheduler::GuestScheduler;
use crate::core::provisioner::{ProcessingElement, ResourceProvisioner};

/// Capacity of an entity hosting guests (PEs, RAM, bandwidth, storage) and its current allocations.
///
/// Used both by physical hosts and by virtual machines hosting containers.
#[derive(Clone, Debug, Serialize)]
pub struct ResourcePool {
    guest_scheduler: GuestScheduler,
    ram: ResourceProvisioner,
    bandwidth: ResourceProvisioner,
    storage: ResourceProvisioner,
    guests: Vec<u32>,
    guests_migrating_in: BTreeSet<u32>,
}

impl ResourcePool {
    pub fn new(pes: Vec<ProcessingElement>, ram: u64, bandwidth: u64, storage: u64) -> Self {
        Self {
            guest_scheduler: GuestScheduler::new(pes),
            ram: ResourceProvisioner::new(ram),
            bandwidth: ResourceProvisioner::new(bandwidth),
            storage: ResourceProvisioner::new(storage),
            guests: Vec::new(),
            guests_migrating_in: BTreeSet::new(),
        }
    }

    /// Creates a pool with `pe_count` identical PEs.
    pub fn uniform(pe_count: u32, mips_per_pe: f64, ram: u64, bandwidth: u64, storage: u64) -> Self {
        let pes = (0..pe_count).map(|id| ProcessingElement::new(id, mips_per_pe)).collect();
        Self::new(pes, ram, bandwidth, storage)
    }

    /// Checks if the specified guest fits into free capacity.
    pub fn can_allocate(&self, demand: &GuestDemand) -> AllocationVerdict {
        if demand.pes > self.guest_scheduler.pe_count() {
            return AllocationVerdict::NotEnoughPes;
        }
        if self.guest_scheduler.pe_capacity() < demand.mips_per_pe
            || self.guest_scheduler.available_mips() < demand.total_mips()
        {
            return AllocationVerdict::NotEnoughMips;
        }
        if !self.ram.is_suitable(demand.id, demand.ram) {
            return AllocationVerdict::NotEnoughRam;
        }
        if !self.bandwidth.is_suitable(demand.id, demand.bandwidth) {
            return AllocationVerdict::NotEnoughBandwidth;
        }
        if !self.storage.is_suitable(demand.id, demand.storage) {
            return AllocationVerdict::NotEnoughStorage;
        }
        AllocationVerdict::Success
    }

    /// Places the guest: reserves RAM, bandwidth, storage and its full MIPS request.
    pub fn guest_create(&mut self, demand: &GuestDemand) -> AllocationVerdict {
        let verdict = self.reserve(demand);
        if verdict == AllocationVerdict::Success {
            self.guest_scheduler
                .allocate_pes_for_guest(demand.id, &demand.full_mips_request());
        }
        verdict
    }

    /// Places the guest arriving by migration: reserves RAM, bandwidth and storage only.
    ///
    /// The guest gets no PE time until [`finish_migration_in`](Self::finish_migration_in) is called.
    pub fn guest_create_migrating_in(&mut self, demand: &GuestDemand) -> AllocationVerdict {
        if demand.pes > self.guest_scheduler.pe_count() || self.guest_scheduler.pe_capacity() < demand.mips_per_pe {
            return AllocationVerdict::NotEnoughPes;
        }
        let verdict = self.reserve(demand);
        if verdict == AllocationVerdict::Success {
            self.guests_migrating_in.insert(demand.id);
        }
        verdict
    }

    pub fn finish_migration_in(&mut self, guest_id: u32) {
        self.guests_migrating_in.remove(&guest_id);
    }

    fn reserve(&mut self, demand: &GuestDemand) -> AllocationVerdict {
        if self.guests.contains(&demand.id) {
            return AllocationVerdict::Success;
        }
        if !self.storage.allocate(demand.id, demand.storage) {
            return AllocationVerdict::NotEnoughStorage;
        }
        if !self.ram.allocate(demand.id, demand.ram) {
            self.storage.deallocate(demand.id);
            return AllocationVerdict::NotEnoughRam;
        }
        if !self.bandwidth.allocate(demand.id, demand.bandwidth) {
            self.storage.deallocate(demand.id);
            self.ram.deallocate(demand.id);
            return AllocationVerdict::NotEnoughBandwidth;
        }
        self.guests.push(demand.id);
        AllocationVerdict::Success
    }

    /// Removes the guest and releases all its resources.
    pub fn guest_destroy(&mut self, guest_id: u32) {
        self.guest_scheduler.deallocate_pes_for_guest(guest_id);
        self.ram.deallocate(guest_id);
        self.bandwidth.deallocate(guest_id);
        self.storage.deallocate(guest_id);
        self.guests.retain(|&id| id != guest_id);
        self.guests_migrating_in.remove(&guest_id);
    }

    pub fn guest_scheduler(&self) -> &GuestScheduler {
        &self.guest_scheduler
    }

    pub fn guest_scheduler_mut(&mut self) -> &mut GuestScheduler {
        &mut self.guest_scheduler
    }

    pub fn guests(&self) -> &[u32] {
        &self.guests
    }

    pub fn contains(&self, guest_id: u32) -> bool {
        self.guests.contains(&guest_id)
    }

    pub fn is_migrating_in(&self, guest_id: u32) -> bool {
        self.guests_migrating_in.contains(&guest_id)
    }

    pub fn ram(&self) -> &ResourceProvisioner {
        &self.ram
    }

    pub fn bandwidth(&self) -> &ResourceProvisioner {
        &self.bandwidth
    }

    pub fn storage(&self) -> &ResourceProvisioner {
        &self.storage
    }

    pub fn total_mips(&self) -> f64 {
        self.guest_scheduler.total_mips()
    }

    pub fn allocated_mips(&self) -> f64 {
        self.guest_scheduler.allocated_mips()
    }

    /// Returns the RAM allocation rate (ratio of allocated to total RAM).
    pub fn ram_load(&self) -> f64 {
        if self.ram.capacity() == 0 {
            return 0.;
        }
        self.ram.allocated() as f64 / self.ram.capacity() as f64
    }
}
