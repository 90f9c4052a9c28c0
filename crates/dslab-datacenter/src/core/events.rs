//! Datacenter simulation events.

// GUEST LIFECYCLE EVENTS //////////////////////////////////////////////////////////////////////////

pub mod guest {
    use serde::Serialize;

    #[derive(Clone, Serialize)]
    pub struct GuestCreateRequest {
        pub guest_id: u32,
    }

    #[derive(Clone, Serialize)]
    pub struct GuestDestroyRequest {
        pub guest_id: u32,
    }
}

// MIGRATION EVENTS ////////////////////////////////////////////////////////////////////////////////

pub mod migration {
    use serde::Serialize;

    #[derive(Clone, Serialize)]
    pub struct MigrationCompleted {
        pub guest_id: u32,
        pub source_host: u32,
        pub target_host: u32,
    }
}

// CLOUDLET EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod cloudlet {
    use serde::Serialize;

    #[derive(Clone, Serialize)]
    pub struct CloudletSubmit {
        pub cloudlet_id: u32,
        pub guest_id: u32,
    }
}

// PERIODIC EVENTS /////////////////////////////////////////////////////////////////////////////////

pub mod processing {
    use serde::Serialize;

    #[derive(Clone, Serialize)]
    pub struct UpdateProcessing {}

    #[derive(Clone, Serialize)]
    pub struct OptimizeAllocation {}
}

// NETWORK EVENTS //////////////////////////////////////////////////////////////////////////////////

pub mod network {
    use serde::Serialize;

    use crate::core::network::packet::NetworkPacket;

    #[derive(Clone, Serialize)]
    pub struct PacketAtSwitch {
        pub switch_id: u32,
        pub packet: NetworkPacket,
    }

    #[derive(Clone, Serialize)]
    pub struct SwitchFlush {
        pub switch_id: u32,
    }

    #[derive(Clone, Serialize)]
    pub struct PacketAtHost {
        pub host_id: u32,
        pub packet: NetworkPacket,
    }
}
