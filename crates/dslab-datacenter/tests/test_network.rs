use approx::assert_abs_diff_eq;
use rstest::rstest;

use dslab_core::Simulation;

use dslab_datacenter::core::cloudlet::{Cloudlet, CloudletStatus};
use dslab_datacenter::core::config::sim_config::{HostSpec, SimulationConfig};
use dslab_datacenter::core::error::ConfigurationError;
use dslab_datacenter::core::network::switch::SwitchLevel;
use dslab_datacenter::simulation::DatacenterSimulation;
use dslab_datacenter::workload::GuestResources;

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn vm() -> GuestResources {
    GuestResources::new(1, 1000., 512, 100_000_000, 1000)
}

fn host() -> HostSpec {
    HostSpec::new(2, 1000., 4096, 1_000_000_000, 10000)
}

/// Sends a single packet from a guest on `from` to a guest on `to`.
/// Returns IDs of the receiver guest and of the sender and receiver cloudlets.
fn ping(dc: &mut DatacenterSimulation, from: u32, to: u32, data: u64) -> (u32, u32, u32) {
    let sender_vm = dc.create_vm_on_host(&vm(), 0, from);
    let receiver_vm = dc.create_vm_on_host(&vm(), 0, to);
    let sender_id = dc.reserve_cloudlet_id();
    let receiver_id = dc.reserve_cloudlet_id();
    dc.submit_cloudlet(Cloudlet::new(sender_id, 1).add_send_stage(receiver_id, data), sender_vm);
    dc.submit_cloudlet(Cloudlet::new(receiver_id, 1).add_recv_stage(sender_id), receiver_vm);
    (receiver_vm, sender_id, receiver_id)
}

/// Builds two edge switches under separate aggregate switches joined by a root switch.
fn three_level(dc: &mut DatacenterSimulation) -> [u32; 4] {
    let hosts: Vec<u32> = (0..4).map(|i| dc.add_host(&format!("h{}", i), &host())).collect();
    let root = dc.add_switch("root", SwitchLevel::Root, 2, 1e9, 1e9);
    let aggr0 = dc.add_switch("aggr0", SwitchLevel::Aggregate, 1, 1e9, 1e9);
    let aggr1 = dc.add_switch("aggr1", SwitchLevel::Aggregate, 1, 1e9, 1e9);
    let edge0 = dc.add_switch("edge0", SwitchLevel::Edge, 2, 1e9, 1e8);
    let edge1 = dc.add_switch("edge1", SwitchLevel::Edge, 2, 1e9, 1e8);
    dc.attach_switches(root, aggr0).unwrap();
    dc.attach_switches(root, aggr1).unwrap();
    dc.attach_switches(edge0, aggr0).unwrap();
    dc.attach_switches(edge1, aggr1).unwrap();
    dc.attach_host(edge0, hosts[0]).unwrap();
    dc.attach_host(edge0, hosts[1]).unwrap();
    dc.attach_host(edge1, hosts[2]).unwrap();
    dc.attach_host(edge1, hosts[3]).unwrap();
    [hosts[0], hosts[1], hosts[2], hosts[3]]
}

#[test]
// Two hosts under one edge switch, 100 bytes over 100 Mb/s links.
// The packet spends 8e-6 s on the way to the switch and the same time from the switch to the receiver host.
fn test_single_edge_switch() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("network.yaml")).unwrap();
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    let (_, sender, receiver) = ping(&mut dc, 0, 1, 100);
    dc.step_until_no_events();

    let dc_ref = dc.datacenter();
    let packets = dc_ref.delivered_packets();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].send_time, 0.);
    assert_abs_diff_eq!(packets[0].delay().unwrap(), 8e-6 + 8e-6, epsilon = 1e-12);
    drop(dc_ref);

    assert_eq!(dc.total_data_transfer(), 100);
    assert_eq!(dc.dropped_packet_count(), 0);
    assert_eq!(dc.cloudlet_record(sender).unwrap().exec_finish, Some(0.));
    // receiver picks the packet up at the next processing update
    let record = dc.cloudlet_record(receiver).unwrap();
    assert_eq!(record.status, CloudletStatus::Success);
    assert_eq!(record.exec_finish, Some(1.));
}

#[test]
// Guests on the same host exchange packets without delay.
fn test_same_host_delivery() {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let h0 = dc.add_host("h0", &host());
    let (_, _, receiver) = ping(&mut dc, h0, h0, 100);
    dc.step_until_no_events();

    assert_eq!(dc.total_data_transfer(), 0);
    assert!(dc.datacenter().delivered_packets().is_empty());
    let record = dc.cloudlet_record(receiver).unwrap();
    assert_eq!(record.status, CloudletStatus::Success);
    assert_eq!(record.exec_finish, Some(0.));
}

#[test]
// Packet between different aggregate switches goes through the root switch.
// Host links are 100 Mb/s, links between switches are 1 Gb/s.
fn test_route_through_root() {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let [h0, _, h2, _] = three_level(&mut dc);
    let (_, _, receiver) = ping(&mut dc, h0, h2, 100);
    dc.step_until_no_events();

    let expected = 2. * 8e-6 + 4. * 8e-7;
    assert_abs_diff_eq!(
        dc.datacenter().delivered_packets()[0].delay().unwrap(),
        expected,
        epsilon = 1e-12
    );
    assert_eq!(dc.cloudlet_record(receiver).unwrap().status, CloudletStatus::Success);
    let dc_ref = dc.datacenter();
    let forwarded: u64 = dc_ref.topology().switches().map(|s| s.forwarded_packets()).sum();
    assert_eq!(forwarded, 5);
}

#[test]
// Each switch adds the switching delay, nested guests add virtualization overhead.
fn test_switching_delay_and_virtualization_overhead() {
    let mut sim_config = SimulationConfig::new();
    sim_config.switching_delay = 1e-3;
    sim_config.virtualization_overhead = 0.01;
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    let [h0, h1, _, _] = three_level(&mut dc);

    let vm_resources = GuestResources::new(2, 1000., 1024, 200_000_000, 2000);
    let sender_vm = dc.create_vm_on_host(&vm_resources, 0, h0);
    let receiver_vm = dc.create_vm_on_host(&vm_resources, 0, h1);
    let sender_container = dc.create_container(&vm(), 0, Some(sender_vm));
    let receiver_container = dc.create_container(&vm(), 0, Some(receiver_vm));
    let sender_id = dc.reserve_cloudlet_id();
    let receiver_id = dc.reserve_cloudlet_id();
    dc.submit_cloudlet(Cloudlet::new(sender_id, 1).add_send_stage(receiver_id, 100), sender_container);
    dc.submit_cloudlet(Cloudlet::new(receiver_id, 1).add_recv_stage(sender_id), receiver_container);
    dc.step_until_no_events();

    // one nesting level on both sides, one edge switch on the way
    let expected = 2. * 8e-6 + 2. * 0.01 + 1e-3;
    let dc_ref = dc.datacenter();
    let packet = &dc_ref.delivered_packets()[0];
    assert_abs_diff_eq!(packet.virtualization_overhead, 0.02, epsilon = 1e-12);
    assert_abs_diff_eq!(packet.delay().unwrap(), expected, epsilon = 1e-12);
}

#[test]
// Host without edge switch can't send packets to other hosts, such packets are dropped.
fn test_packet_from_detached_host_is_dropped() {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let h0 = dc.add_host("h0", &host());
    let h1 = dc.add_host("h1", &host());
    let (receiver_vm, sender, receiver) = ping(&mut dc, h0, h1, 100);
    // receiver never gets the packet and is stopped with its guest
    dc.destroy_guest(receiver_vm, 2.5);
    dc.step_until_no_events();

    assert_eq!(dc.dropped_packet_count(), 1);
    assert_eq!(dc.cloudlet_record(sender).unwrap().status, CloudletStatus::Success);
    assert_eq!(dc.cloudlet_record(receiver).unwrap().status, CloudletStatus::Failed);
    assert_eq!(dc.total_data_transfer(), 0);
}

#[rstest]
#[case(SwitchLevel::Edge, SwitchLevel::Edge)]
#[case(SwitchLevel::Aggregate, SwitchLevel::Aggregate)]
#[case(SwitchLevel::Root, SwitchLevel::Root)]
#[case(SwitchLevel::Edge, SwitchLevel::Root)]
#[case(SwitchLevel::Root, SwitchLevel::Edge)]
fn test_incompatible_switch_levels(#[case] first: SwitchLevel, #[case] second: SwitchLevel) {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let a = dc.add_switch("a", first, 4, 1e9, 1e9);
    let b = dc.add_switch("b", second, 4, 1e9, 1e9);
    assert_eq!(
        dc.attach_switches(a, b),
        Err(ConfigurationError::IncompatibleSwitchLevels { first, second })
    );
}

#[rstest]
#[case(SwitchLevel::Edge, SwitchLevel::Aggregate)]
#[case(SwitchLevel::Aggregate, SwitchLevel::Edge)]
#[case(SwitchLevel::Aggregate, SwitchLevel::Root)]
#[case(SwitchLevel::Root, SwitchLevel::Aggregate)]
fn test_compatible_switch_levels(#[case] first: SwitchLevel, #[case] second: SwitchLevel) {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let a = dc.add_switch("a", first, 4, 1e9, 1e9);
    let b = dc.add_switch("b", second, 4, 1e9, 1e9);
    assert_eq!(dc.attach_switches(a, b), Ok(()));
}

#[test]
fn test_host_attachment_errors() {
    let mut dc = DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap();
    let hosts: Vec<u32> = (0..3).map(|i| dc.add_host(&format!("h{}", i), &host())).collect();
    let edge = dc.add_switch("edge", SwitchLevel::Edge, 2, 1e9, 1e9);
    let aggr = dc.add_switch("aggr", SwitchLevel::Aggregate, 2, 1e9, 1e9);

    assert!(matches!(
        dc.attach_host(aggr, hosts[0]),
        Err(ConfigurationError::HostAttachedToNonEdge { .. })
    ));
    assert_eq!(dc.attach_host(99, hosts[0]), Err(ConfigurationError::UnknownSwitch(99)));
    assert_eq!(dc.attach_host(edge, 99), Err(ConfigurationError::UnknownHost(99)));
    dc.attach_host(edge, hosts[0]).unwrap();
    dc.attach_host(edge, hosts[1]).unwrap();
    assert!(matches!(
        dc.attach_host(edge, hosts[2]),
        Err(ConfigurationError::PortLimitExceeded { .. })
    ));
}

#[test]
// Topology is built from names given in the config.
fn test_topology_from_config() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("network.yaml")).unwrap();
    let dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    let dc_ref = dc.datacenter();
    let edge = dc_ref.topology().switch_by_name("edge0").unwrap();
    assert_eq!(edge.level, SwitchLevel::Edge);
    assert_eq!(edge.used_ports(), 2);
    assert_eq!(dc_ref.topology().host_edge(0), Some(edge.id));
    assert_eq!(dc_ref.topology().host_edge(1), Some(edge.id));
}
