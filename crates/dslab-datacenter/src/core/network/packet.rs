//! Packets exchanged by cloudlets.

use serde::Serialize;

/// Packet as seen by guests: addressed by guest and cloudlet IDs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostPacket {
    pub sender_guest: u32,
    pub receiver_guest: u32,
    pub sender_cloudlet: u32,
    pub receiver_cloudlet: u32,
    /// Payload size in bytes.
    pub data: u64,
    pub send_time: f64,
    /// Delay in seconds added by virtualization layers on both ends.
    pub virtualization_overhead: f64,
    /// Set when the packet is put into the receiver's inbox.
    pub recv_time: Option<f64>,
}

impl HostPacket {
    pub fn new(
        sender_guest: u32,
        receiver_guest: u32,
        sender_cloudlet: u32,
        receiver_cloudlet: u32,
        data: u64,
        send_time: f64,
    ) -> Self {
        Self {
            sender_guest,
            receiver_guest,
            sender_cloudlet,
            receiver_cloudlet,
            data,
            send_time,
            virtualization_overhead: 0.,
            recv_time: None,
        }
    }

    /// Time spent by the packet in flight, if it is delivered.
    pub fn delay(&self) -> Option<f64> {
        self.recv_time.map(|t| t - self.send_time)
    }
}

/// Packet travelling between physical hosts through switches.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NetworkPacket {
    pub sender_host: u32,
    pub receiver_host: u32,
    pub packet: HostPacket,
}

impl NetworkPacket {
    pub fn new(sender_host: u32, receiver_host: u32, packet: HostPacket) -> Self {
        Self {
            sender_host,
            receiver_host,
            packet,
        }
    }

    /// Payload size in bits.
    pub fn size_bits(&self) -> f64 {
        self.packet.data as f64 * 8.
    }
}
