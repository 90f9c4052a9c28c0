//! Time-shared scheduler of cloudlets inside a guest.

use std::collections::BTreeMap;

use crate::core::cloudlet::{Cloudlet, CloudletRecord, Stage};
use crate::core::network::nic::NetworkInterface;
use crate::core::network::packet::HostPacket;

/// Runs cloudlets of a single guest.
///
/// MIPS allocated to the guest are shared among cloudlets being at a compute stage in proportion to their demand.
/// Network stages are served through the guest network interface.
#[derive(Clone, Default)]
pub struct CloudletScheduler {
    cloudlets: Vec<Cloudlet>,
    rates: BTreeMap<u32, f64>,
    last_update: f64,
}

impl CloudletScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts the cloudlet. It starts executing immediately if the guest is running.
    pub fn submit(&mut self, mut cloudlet: Cloudlet, guest_id: u32, time: f64, running: bool) {
        cloudlet.submit(guest_id, time);
        if running {
            cloudlet.start(time);
        }
        self.cloudlets.push(cloudlet);
    }

    /// Starts all queued cloudlets, called when the guest gets placed.
    pub fn start_all(&mut self, time: f64) {
        self.last_update = time;
        for cloudlet in self.cloudlets.iter_mut() {
            cloudlet.start(time);
        }
    }

    /// Advances compute stages using rates set at the previous allocation.
    pub fn update_progress(&mut self, time: f64) {
        let elapsed = time - self.last_update;
        self.last_update = time;
        if elapsed <= 0. {
            return;
        }
        for cloudlet in self.cloudlets.iter_mut() {
            if !cloudlet.is_computing() {
                continue;
            }
            let rate = self.rates.get(&cloudlet.id).copied().unwrap_or(0.);
            if rate > 0. && cloudlet.consume(rate * elapsed) {
                cloudlet.next_stage(time);
            }
        }
    }

    /// Completes network stages that can be completed at the current time.
    ///
    /// A send stage puts a packet into the guest outbox and completes immediately, unless the peer cloudlet is not
    /// bound to any guest yet. A receive stage completes when the expected packet is in the inbox.
    /// Returns true if any stage was completed.
    pub fn process_stages(
        &mut self,
        time: f64,
        guest_id: u32,
        nic: &mut NetworkInterface,
        bindings: &BTreeMap<u32, u32>,
    ) -> bool {
        let mut progressed = false;
        for cloudlet in self.cloudlets.iter_mut() {
            if cloudlet.status().is_terminal() {
                continue;
            }
            while !cloudlet.status().is_terminal() {
                let done = match cloudlet.current_stage() {
                    Some(Stage::Send { peer, data }) => match bindings.get(peer) {
                        Some(&receiver_guest) => {
                            nic.push_outgoing(HostPacket::new(
                                guest_id,
                                receiver_guest,
                                cloudlet.id,
                                *peer,
                                *data,
                                time,
                            ));
                            true
                        }
                        None => false,
                    },
                    Some(Stage::Recv { peer }) => nic.take_received(*peer, cloudlet.id, time).is_some(),
                    _ => false,
                };
                if !done {
                    break;
                }
                cloudlet.next_stage(time);
                progressed = true;
            }
        }
        progressed
    }

    /// MIPS needed by cloudlets at compute stages.
    pub fn requested_mips(&self, time: f64, guest_pes: u32, mips_per_pe: f64) -> f64 {
        self.cloudlets
            .iter()
            .filter(|c| c.is_computing())
            .map(|c| Self::demand(c, time, guest_pes, mips_per_pe))
            .sum()
    }

    /// Shares `mips` among cloudlets at compute stages.
    pub fn allocate(&mut self, time: f64, mips: f64, guest_pes: u32, mips_per_pe: f64) {
        self.rates.clear();
        let demands: Vec<(u32, f64)> = self
            .cloudlets
            .iter()
            .filter(|c| c.is_computing())
            .map(|c| (c.id, Self::demand(c, time, guest_pes, mips_per_pe)))
            .collect();
        let total: f64 = demands.iter().map(|(_, d)| d).sum();
        if total <= 0. {
            return;
        }
        for (id, demand) in demands {
            self.rates.insert(id, mips * demand / total);
        }
    }

    fn demand(cloudlet: &Cloudlet, time: f64, guest_pes: u32, mips_per_pe: f64) -> f64 {
        cloudlet.utilization(time).clamp(0., 1.) * cloudlet.pes.min(guest_pes) as f64 * mips_per_pe
    }

    /// Current execution rate of the cloudlet in MIPS.
    pub fn rate(&self, cloudlet_id: u32) -> f64 {
        self.rates.get(&cloudlet_id).copied().unwrap_or(0.)
    }

    pub fn set_host(&mut self, host_id: u32) {
        for cloudlet in self.cloudlets.iter_mut() {
            if !cloudlet.status().is_terminal() {
                cloudlet.set_host(host_id);
            }
        }
    }

    /// Fails all unfinished cloudlets.
    pub fn fail_all(&mut self, time: f64) {
        self.rates.clear();
        for cloudlet in self.cloudlets.iter_mut() {
            cloudlet.fail(time);
        }
    }

    pub fn has_unfinished(&self) -> bool {
        self.cloudlets.iter().any(|c| !c.status().is_terminal())
    }

    /// Returns true if the scheduler got some cloudlets and all of them are done.
    pub fn is_finished(&self) -> bool {
        !self.cloudlets.is_empty() && !self.has_unfinished()
    }

    pub fn cloudlets(&self) -> &[Cloudlet] {
        &self.cloudlets
    }

    pub fn records(&self) -> Vec<CloudletRecord> {
        self.cloudlets.iter().map(|c| c.record()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cloudlet::CloudletStatus;
    use crate::core::utilization_model::ConstantUtilizationModel;

    #[test]
    fn test_proportional_sharing() {
        let mut scheduler = CloudletScheduler::new();
        scheduler.submit(Cloudlet::new(0, 1).add_execution_stage(1000.), 5, 0., true);
        scheduler.submit(
            Cloudlet::new(1, 1)
                .add_execution_stage(1000.)
                .with_utilization_model(Box::new(ConstantUtilizationModel::new(0.5))),
            5,
            0.,
            true,
        );
        assert_eq!(scheduler.requested_mips(0., 2, 100.), 150.);
        scheduler.allocate(0., 75., 2, 100.);
        assert_eq!(scheduler.rate(0), 50.);
        assert_eq!(scheduler.rate(1), 25.);
        scheduler.update_progress(10.);
        assert_eq!(scheduler.cloudlets()[0].remaining_length(), 500.);
        assert_eq!(scheduler.cloudlets()[1].remaining_length(), 750.);
    }

    #[test]
    fn test_send_waits_for_peer_binding() {
        let mut scheduler = CloudletScheduler::new();
        let mut nic = NetworkInterface::new(5);
        scheduler.submit(Cloudlet::new(0, 1).add_send_stage(1, 100), 5, 0., true);
        let mut bindings = BTreeMap::new();
        assert!(!scheduler.process_stages(0., 5, &mut nic, &bindings));
        assert!(nic.outbox().is_empty());
        bindings.insert(1, 6);
        assert!(scheduler.process_stages(1., 5, &mut nic, &bindings));
        assert_eq!(nic.outbox()[0].receiver_guest, 6);
        assert_eq!(scheduler.cloudlets()[0].status(), CloudletStatus::Success);
        assert_eq!(scheduler.cloudlets()[0].exec_finish_time(), Some(1.));
    }

    #[test]
    fn test_queued_cloudlets_fail() {
        let mut scheduler = CloudletScheduler::new();
        scheduler.submit(Cloudlet::new(0, 1).add_recv_stage(3), 5, 0., false);
        assert_eq!(scheduler.cloudlets()[0].status(), CloudletStatus::Queued);
        scheduler.fail_all(2.);
        assert_eq!(scheduler.cloudlets()[0].status(), CloudletStatus::Failed);
        assert!(scheduler.is_finished());
    }
}
