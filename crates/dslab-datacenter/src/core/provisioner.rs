//! Provisioners tracking allocated and free capacity of a single resource.

use std::collections::BTreeMap;

use serde::Serialize;

/// Tracks allocations of a scalar resource (RAM, bandwidth or storage) among guests.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceProvisioner {
    capacity: u64,
    available: u64,
    allocations: BTreeMap<u32, u64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: capacity,
            allocations: BTreeMap::new(),
        }
    }

    /// Checks whether the guest can get the specified amount, taking its current allocation into account.
    pub fn is_suitable(&self, guest_id: u32, amount: u64) -> bool {
        self.available + self.allocated_for(guest_id) >= amount
    }

    /// Replaces the current allocation of the guest. Returns false and leaves state intact if there is not enough
    /// free capacity.
    pub fn allocate(&mut self, guest_id: u32, amount: u64) -> bool {
        if !self.is_suitable(guest_id, amount) {
            return false;
        }
        self.deallocate(guest_id);
        self.available -= amount;
        self.allocations.insert(guest_id, amount);
        true
    }

    pub fn deallocate(&mut self, guest_id: u32) {
        if let Some(amount) = self.allocations.remove(&guest_id) {
            self.available += amount;
        }
    }

    pub fn allocated_for(&self, guest_id: u32) -> u64 {
        self.allocations.get(&guest_id).copied().unwrap_or(0)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn allocated(&self) -> u64 {
        self.capacity - self.available
    }
}

/// Tracks how the MIPS capacity of a single processing element is shared among guests.
#[derive(Clone, Debug, Serialize)]
pub struct PeProvisioner {
    mips: f64,
    available: f64,
    allocations: BTreeMap<u32, f64>,
}

impl PeProvisioner {
    pub fn new(mips: f64) -> Self {
        Self {
            mips,
            available: mips,
            allocations: BTreeMap::new(),
        }
    }

    /// Gives the guest up to `mips` of this PE and returns the amount actually given.
    pub fn allocate(&mut self, guest_id: u32, mips: f64) -> f64 {
        let granted = mips.min(self.available).max(0.);
        if granted > 0. {
            self.available -= granted;
            *self.allocations.entry(guest_id).or_insert(0.) += granted;
        }
        granted
    }

    pub fn deallocate(&mut self, guest_id: u32) {
        if let Some(mips) = self.allocations.remove(&guest_id) {
            self.available += mips;
        }
    }

    pub fn deallocate_all(&mut self) {
        self.allocations.clear();
        self.available = self.mips;
    }

    pub fn allocated_for(&self, guest_id: u32) -> f64 {
        self.allocations.get(&guest_id).copied().unwrap_or(0.)
    }

    pub fn mips(&self) -> f64 {
        self.mips
    }

    pub fn available(&self) -> f64 {
        self.available
    }
}

/// Processing element, the unit of compute capacity rated in MIPS.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessingElement {
    pub id: u32,
    provisioner: PeProvisioner,
}

impl ProcessingElement {
    pub fn new(id: u32, mips: f64) -> Self {
        Self {
            id,
            provisioner: PeProvisioner::new(mips),
        }
    }

    pub fn mips(&self) -> f64 {
        self.provisioner.mips()
    }

    pub fn provisioner(&self) -> &PeProvisioner {
        &self.provisioner
    }

    pub fn provisioner_mut(&mut self) -> &mut PeProvisioner {
        &mut self.provisioner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_provisioner_reallocation() {
        let mut ram = ResourceProvisioner::new(100);
        assert!(ram.allocate(1, 60));
        assert!(!ram.allocate(2, 50));
        assert_eq!(ram.available(), 40);
        // growing an existing allocation reuses what the guest already holds
        assert!(ram.allocate(1, 90));
        assert_eq!(ram.allocated(), 90);
        ram.deallocate(1);
        assert_eq!(ram.available(), 100);
    }

    #[test]
    fn test_pe_provisioner_grants_at_most_available() {
        let mut pe = PeProvisioner::new(1000.);
        assert_eq!(pe.allocate(1, 700.), 700.);
        assert_eq!(pe.allocate(2, 700.), 300.);
        assert_eq!(pe.available(), 0.);
        pe.deallocate(1);
        assert_eq!(pe.available(), 700.);
        pe.deallocate_all();
        assert_eq!(pe.available(), 1000.);
        assert_eq!(pe.allocated_for(2), 0.);
    }
}
