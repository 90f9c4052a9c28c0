use serde::{Deserialize, Serialize};

/// Resources requested by a guest from the entity hosting it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GuestDemand {
    pub id: u32,
    pub pes: u32,
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bandwidth: u64,
    pub storage: u64,
}

impl GuestDemand {
    pub fn total_mips(&self) -> f64 {
        self.pes as f64 * self.mips_per_pe
    }

    /// Per-PE MIPS vector requested when the guest runs at full capacity.
    pub fn full_mips_request(&self) -> Vec<f64> {
        vec![self.mips_per_pe; self.pes as usize]
    }
}

#[derive(Debug, PartialEq)]
pub enum AllocationVerdict {
    NotEnoughPes,
    NotEnoughMips,
    NotEnoughRam,
    NotEnoughBandwidth,
    NotEnoughStorage,
    Success,
}

/// Something guests can be placed on: a physical host or a virtual machine hosting containers.
pub trait HostEntity {
    fn id(&self) -> u32;

    /// Checks whether the guest fits into currently free capacity.
    fn can_allocate(&self, demand: &GuestDemand) -> AllocationVerdict;

    fn is_suitable_for_guest(&self, demand: &GuestDemand) -> bool {
        self.can_allocate(demand) == AllocationVerdict::Success
    }

    /// Total MIPS capacity.
    fn total_mips(&self) -> f64;

    /// MIPS currently given to resident guests.
    fn allocated_mips(&self) -> f64;

    fn utilization(&self) -> f64 {
        let total = self.total_mips();
        if total == 0. {
            return 0.;
        }
        self.allocated_mips() / total
    }

    /// IDs of guests placed directly on this entity.
    fn guest_ids(&self) -> Vec<u32>;
}

/// Entity attached to the datacenter network.
pub trait NetworkedEntity {
    /// Returns the edge switch the entity is connected to.
    fn edge_switch(&self) -> Option<u32>;

    fn set_edge_switch(&mut self, switch_id: u32);
}

/// Entity with power consumption.
pub trait PowerAware {
    /// Power consumption in Watts observed at the latest processing update.
    fn current_power(&self) -> f64;

    /// Energy consumed so far in Joules.
    fn energy_consumed(&self) -> f64;
}
