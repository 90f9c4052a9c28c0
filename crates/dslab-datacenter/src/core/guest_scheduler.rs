//! Time-shared scheduler of processing elements among resident guests.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::provisioner::ProcessingElement;

/// Shares the MIPS of host PEs among guests.
///
/// Each virtual PE of a guest is mapped onto one or more physical PEs, so a single virtual PE may span several
/// physical ones when none of them has enough free capacity alone. Allocation is best effort: if the host can't
/// satisfy the whole request, the guest gets what is left.
#[derive(Clone, Debug, Serialize)]
pub struct GuestScheduler {
    pes: Vec<ProcessingElement>,
    requested: BTreeMap<u32, Vec<f64>>,
    allocated: BTreeMap<u32, f64>,
}

impl GuestScheduler {
    pub fn new(pes: Vec<ProcessingElement>) -> Self {
        Self {
            pes,
            requested: BTreeMap::new(),
            allocated: BTreeMap::new(),
        }
    }

    /// Allocates the requested per-PE MIPS to the guest and returns the total MIPS actually allocated.
    ///
    /// Any previous allocation of the guest is released first.
    pub fn allocate_pes_for_guest(&mut self, guest_id: u32, requested_mips: &[f64]) -> f64 {
        self.deallocate_pes_for_guest(guest_id);
        let pe_capacity = self.pe_capacity();
        let mut total = 0.;
        for &mips in requested_mips {
            let mut left = mips.min(pe_capacity);
            for pe in self.pes.iter_mut() {
                if left <= 0. {
                    break;
                }
                if pe.provisioner().available() <= 0. {
                    continue;
                }
                let granted = pe.provisioner_mut().allocate(guest_id, left);
                left -= granted;
                total += granted;
            }
        }
        self.requested.insert(guest_id, requested_mips.to_vec());
        self.allocated.insert(guest_id, total);
        total
    }

    pub fn deallocate_pes_for_guest(&mut self, guest_id: u32) {
        for pe in self.pes.iter_mut() {
            pe.provisioner_mut().deallocate(guest_id);
        }
        self.requested.remove(&guest_id);
        self.allocated.remove(&guest_id);
    }

    pub fn deallocate_all(&mut self) {
        for pe in self.pes.iter_mut() {
            pe.provisioner_mut().deallocate_all();
        }
        self.requested.clear();
        self.allocated.clear();
    }

    pub fn total_allocated_mips_for_guest(&self, guest_id: u32) -> f64 {
        self.allocated.get(&guest_id).copied().unwrap_or(0.)
    }

    pub fn requested_mips_for_guest(&self, guest_id: u32) -> f64 {
        self.requested.get(&guest_id).map(|r| r.iter().sum()).unwrap_or(0.)
    }

    /// Returns IDs of PEs currently giving some capacity to the guest.
    pub fn pes_allocated_for_guest(&self, guest_id: u32) -> Vec<u32> {
        self.pes
            .iter()
            .filter(|pe| pe.provisioner().allocated_for(guest_id) > 0.)
            .map(|pe| pe.id)
            .collect()
    }

    pub fn total_mips(&self) -> f64 {
        self.pes.iter().map(|pe| pe.mips()).sum()
    }

    pub fn available_mips(&self) -> f64 {
        self.pes.iter().map(|pe| pe.provisioner().available()).sum()
    }

    pub fn allocated_mips(&self) -> f64 {
        self.total_mips() - self.available_mips()
    }

    /// Returns the capacity of the most powerful PE.
    pub fn pe_capacity(&self) -> f64 {
        self.pes.iter().map(|pe| pe.mips()).fold(0., f64::max)
    }

    pub fn pe_count(&self) -> u32 {
        self.pes.len() as u32
    }

    pub fn pes(&self) -> &[ProcessingElement] {
        &self.pes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(pe_count: u32, mips: f64) -> GuestScheduler {
        GuestScheduler::new((0..pe_count).map(|id| ProcessingElement::new(id, mips)).collect())
    }

    #[test]
    fn test_virtual_pe_spans_physical_pes() {
        let mut scheduler = scheduler(2, 1000.);
        assert_eq!(scheduler.allocate_pes_for_guest(1, &[600.]), 600.);
        // second guest's PE does not fit into the remaining 400 MIPS of PE #0 and continues on PE #1
        assert_eq!(scheduler.allocate_pes_for_guest(2, &[800.]), 800.);
        assert_eq!(scheduler.pes_allocated_for_guest(2), vec![0, 1]);
        assert_eq!(scheduler.available_mips(), 600.);
    }

    #[test]
    fn test_allocation_is_best_effort() {
        let mut scheduler = scheduler(1, 1000.);
        assert_eq!(scheduler.allocate_pes_for_guest(1, &[700.]), 700.);
        assert_eq!(scheduler.allocate_pes_for_guest(2, &[500.]), 300.);
        assert_eq!(scheduler.requested_mips_for_guest(2), 500.);
        scheduler.deallocate_all();
        assert_eq!(scheduler.allocated_mips(), 0.);
        assert_eq!(scheduler.total_allocated_mips_for_guest(1), 0.);
    }

    #[test]
    fn test_virtual_pe_is_capped_by_pe_capacity() {
        let mut scheduler = scheduler(4, 100.);
        assert_eq!(scheduler.allocate_pes_for_guest(1, &[250.]), 100.);
    }
}
