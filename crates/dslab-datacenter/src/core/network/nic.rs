//! Guest network interface.

use serde::Serialize;

use crate::core::network::packet::HostPacket;

/// Per-guest network interface kept by the physical host running the guest.
#[derive(Clone, Debug, Default, Serialize)]
pub struct NetworkInterface {
    pub guest_id: u32,
    outbox: Vec<HostPacket>,
    inbox: Vec<HostPacket>,
    sent_packets: u64,
    received_packets: u64,
}

impl NetworkInterface {
    pub fn new(guest_id: u32) -> Self {
        Self {
            guest_id,
            ..Default::default()
        }
    }

    pub fn push_outgoing(&mut self, packet: HostPacket) {
        self.sent_packets += 1;
        self.outbox.push(packet);
    }

    pub fn take_outgoing(&mut self) -> Vec<HostPacket> {
        std::mem::take(&mut self.outbox)
    }

    pub fn deliver(&mut self, packet: HostPacket) {
        self.received_packets += 1;
        self.inbox.push(packet);
    }

    /// Removes and returns the earliest delivered packet sent from `sender_cloudlet` to `receiver_cloudlet`.
    pub fn take_received(&mut self, sender_cloudlet: u32, receiver_cloudlet: u32, time: f64) -> Option<HostPacket> {
        let pos = self.inbox.iter().position(|p| {
            p.sender_cloudlet == sender_cloudlet
                && p.receiver_cloudlet == receiver_cloudlet
                && p.recv_time.map_or(false, |t| t <= time)
        })?;
        Some(self.inbox.remove(pos))
    }

    pub fn outbox(&self) -> &[HostPacket] {
        &self.outbox
    }

    pub fn inbox(&self) -> &[HostPacket] {
        &self.inbox
    }

    pub fn sent_packets(&self) -> u64 {
        self.sent_packets
    }

    pub fn received_packets(&self) -> u64 {
        self.received_packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_received_matches_cloudlets() {
        let mut nic = NetworkInterface::new(1);
        let mut first = HostPacket::new(0, 1, 10, 11, 100, 0.);
        first.recv_time = Some(2.);
        let mut second = HostPacket::new(0, 1, 12, 11, 100, 0.);
        second.recv_time = Some(1.);
        nic.deliver(first);
        nic.deliver(second);
        assert!(nic.take_received(10, 11, 1.).is_none());
        assert_eq!(nic.take_received(12, 11, 1.).map(|p| p.sender_cloudlet), Some(12));
        assert_eq!(nic.take_received(10, 11, 2.).map(|p| p.sender_cloudlet), Some(10));
        assert!(nic.inbox().is_empty());
        assert_eq!(nic.received_packets(), 2);
    }
}
