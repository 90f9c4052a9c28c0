use approx::assert_abs_diff_eq;

use dslab_core::Simulation;

use dslab_datacenter::core::allocation_policy::{AllocationPolicy, FirstFitAllocationPolicy};
use dslab_datacenter::core::cloudlet::CloudletStatus;
use dslab_datacenter::core::common::HostEntity;
use dslab_datacenter::core::config::sim_config::{HostSpec, SimulationConfig};
use dslab_datacenter::core::guest::GuestStatus;
use dslab_datacenter::core::host::Host;
use dslab_datacenter::core::power_model::{PowerModelParams, PowerModelShape, ShapedPowerModel};
use dslab_datacenter::core::resource_pool::ResourcePool;
use dslab_datacenter::core::utilization_model::{ConstantUtilizationModel, TraceUtilizationModel};
use dslab_datacenter::simulation::DatacenterSimulation;
use dslab_datacenter::core::error::ConfigurationError;
use dslab_datacenter::workload::{submit_workload, GuestResources, TraceSpec};

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn small_host() -> HostSpec {
    HostSpec::new(2, 1000., 4096, 1_000_000_000, 10000)
        .with_power_model(PowerModelParams::new(PowerModelShape::Linear, 200., 0.5))
}

fn small_vm() -> GuestResources {
    GuestResources::new(1, 1000., 512, 100_000_000, 1000)
}

fn empty_sim() -> DatacenterSimulation {
    DatacenterSimulation::new(Simulation::new(123), SimulationConfig::new()).unwrap()
}

#[test]
// Two hosts with 8 PEs each, five small guests.
// First fit packs all guests on the first host and nothing is migrated.
fn test_first_fit_packs_first_host() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    assert_eq!(dc.host_id("h0"), Some(0));
    assert_eq!(dc.host_id("h1"), Some(1));

    let guest = GuestResources::new(1, 10000., 385024 / 5, 100_000_000, 1000);
    let guests: Vec<u32> = (0..5).map(|_| dc.create_vm(&guest, 0)).collect();
    dc.step_until_no_events();

    for guest_id in guests {
        assert_eq!(dc.guest_host(guest_id), Some(0));
        assert_eq!(dc.datacenter().guest(guest_id).unwrap().status(), GuestStatus::Running);
    }
    assert_eq!(dc.migration_count(), 0);
    assert!(dc.unplaceable_guests().is_empty());
}

#[test]
// Guest needing more RAM than any host has is not placed and the simulation goes on.
fn test_guest_larger_than_any_host() {
    let host_pool = || ResourcePool::uniform(8, 10000., 385024, 1_000_000_000, 1_000_000);
    let hosts = vec![
        Host::new(0, "h0", host_pool(), Box::new(ShapedPowerModel::linear(250., 0.7))),
        Host::new(1, "h1", host_pool(), Box::new(ShapedPowerModel::linear(250., 0.7))),
    ];
    let entities: Vec<&dyn HostEntity> = hosts.iter().map(|h| h as &dyn HostEntity).collect();
    let huge = GuestResources::new(1, 1000., 1_000_000, 100, 100).demand();
    assert_eq!(FirstFitAllocationPolicy::new().find_host_for_guest(&huge, &entities), None);

    let sim_config = SimulationConfig::from_file(&name_wrapper("config.yaml")).unwrap();
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    let guest_id = dc.create_vm(&GuestResources::new(1, 1000., 1_000_000, 100, 100), 0);
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(100.);
    let cloudlet_id = dc.submit_cloudlet(cloudlet, guest_id);
    dc.step_until_no_events();

    // retries stop after the allocation timeout
    assert_eq!(dc.current_time(), 5.);
    assert_eq!(dc.unplaceable_guests(), vec![guest_id]);
    assert_eq!(
        dc.datacenter().guest(guest_id).unwrap().status(),
        GuestStatus::FailedToAllocate
    );
    assert_eq!(dc.cloudlet_record(cloudlet_id).unwrap().status, CloudletStatus::Failed);
}

#[test]
// Guest waits for resources freed by a finished guest.
fn test_allocation_retry() {
    let mut dc = empty_sim();
    dc.add_host("h", &HostSpec::new(1, 1000., 1024, 1_000_000_000, 1000));
    let vm = GuestResources::new(1, 1000., 1024, 100, 100);
    let first = dc.create_vm(&vm, 0);
    let second = dc.create_vm(&vm, 0);
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(2000.);
    dc.submit_cloudlet(cloudlet, first);
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(1000.);
    let last = dc.submit_cloudlet(cloudlet, second);
    dc.step_until_no_events();

    // first guest is done at 2, retry at 2 comes before that, so the second guest is placed at 3
    let record = dc.cloudlet_record(last).unwrap();
    assert_eq!(record.status, CloudletStatus::Success);
    assert_eq!(record.exec_start, Some(3.));
    assert_eq!(record.exec_finish, Some(4.));
    assert!(dc.unplaceable_guests().is_empty());
}

#[test]
// Cloudlets sharing a guest get MIPS proportionally to their utilization.
fn test_cloudlet_execution() {
    let mut dc = empty_sim();
    let host = dc.add_host("h", &small_host());
    let vm = dc.create_vm(&GuestResources::new(1, 1000., 512, 100, 100), 0);
    let full = dc.new_cloudlet(1).add_execution_stage(2000.);
    let full = dc.submit_cloudlet(full, vm);
    let half = dc
        .new_cloudlet(1)
        .add_execution_stage(1000.)
        .with_utilization_model(Box::new(ConstantUtilizationModel::new(0.5)));
    let half = dc.submit_cloudlet(half, vm);
    dc.step_until_no_events();

    // rates are 2/3 and 1/3 of 1000 MIPS, both cloudlets finish at 3
    let records = dc.cloudlet_records();
    assert_eq!(records.len(), 2);
    for id in [full, half] {
        let record = dc.cloudlet_record(id).unwrap();
        assert_eq!(record.status, CloudletStatus::Success);
        assert_eq!(record.host_id, Some(host));
        assert_eq!(record.guest_id, Some(vm));
        assert_eq!(record.exec_finish, Some(3.));
    }
    // finished guest is destroyed
    assert!(dc.datacenter().guest(vm).is_none());
}

#[test]
// Container runs inside VM, its cloudlet is executed on the VM's host.
fn test_nested_container() {
    let mut dc = empty_sim();
    dc.add_host("h0", &small_host());
    let host = dc.add_host("h1", &small_host());
    let filler = dc.create_vm_on_host(&GuestResources::new(2, 1000., 512, 100, 100), 0, 0);
    let vm = dc.create_vm(&GuestResources::new(2, 1000., 1024, 200_000_000, 2000), 0);
    let container = dc.create_container(&small_vm(), 0, Some(vm));
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(1000.);
    let cloudlet = dc.submit_cloudlet(cloudlet, container);
    dc.step_for_duration(0.5);

    assert_eq!(dc.guest_host(filler), Some(0));
    assert_eq!(dc.guest_host(vm), Some(host));
    assert_eq!(dc.guest_host(container), Some(host));
    assert_eq!(dc.datacenter().guest(vm).unwrap().children(), vec![container]);

    dc.step_until_no_events();
    let record = dc.cloudlet_record(cloudlet).unwrap();
    assert_eq!(record.status, CloudletStatus::Success);
    assert_eq!(record.host_id, Some(host));
    // both container and its VM are gone after the work is done
    assert!(dc.datacenter().guest(container).is_none());
    assert!(dc.datacenter().guest(vm).is_none());
}

#[test]
// Destroying VM destroys nested containers and fails their cloudlets.
fn test_destroy_subtree() {
    let mut dc = empty_sim();
    dc.add_host("h", &small_host());
    let vm = dc.create_vm(&GuestResources::new(2, 1000., 1024, 200_000_000, 2000), 0);
    let container = dc.create_container(&small_vm(), 0, None);
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(1e9);
    let cloudlet = dc.submit_cloudlet(cloudlet, container);
    dc.destroy_guest(vm, 3.5);
    dc.step_until_no_events();

    assert!(dc.datacenter().guest(vm).is_none());
    assert!(dc.datacenter().guest(container).is_none());
    let record = dc.cloudlet_record(cloudlet).unwrap();
    assert_eq!(record.status, CloudletStatus::Failed);
    assert_eq!(record.exec_finish, Some(3.5));
    let host = dc.datacenter();
    let pool = host.host(0).unwrap().pool();
    assert!(pool.guests().is_empty());
    assert_eq!(pool.ram().allocated(), 0);
}

#[test]
// Cloudlet submitted to unknown guest fails immediately.
fn test_submit_to_unknown_guest() {
    let mut dc = empty_sim();
    dc.add_host("h", &small_host());
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(100.);
    let cloudlet = dc.submit_cloudlet(cloudlet, 42);
    dc.step_until_no_events();
    assert_eq!(dc.cloudlet_record(cloudlet).unwrap().status, CloudletStatus::Failed);
}

#[test]
// Linear power model: idle power is 100 W, full load is 200 W.
// One PE of two is busy during 4 seconds, so the host consumes 150 W.
fn test_energy_consumption() {
    let mut dc = empty_sim();
    dc.add_host("h", &small_host());
    let vm = dc.create_vm(&small_vm(), 0);
    let cloudlet = dc.new_cloudlet(1).add_execution_stage(4000.);
    dc.submit_cloudlet(cloudlet, vm);
    dc.step_until_no_events();

    assert_eq!(dc.current_time(), 4.);
    // the last sample is taken after the guest is done
    assert_abs_diff_eq!(dc.energy_consumed(), 3. * 150. + 100., epsilon = 1e-9);
    let history = dc.host_utilization_history(0);
    assert_eq!(history.len(), 5);
    assert_abs_diff_eq!(history[0].utilization, 0.5);
    assert_abs_diff_eq!(history[4].utilization, 0.);
    assert_abs_diff_eq!(history[4].power, 100.);

    let energy = dc.energy_history();
    assert_eq!(energy.len(), 5);
    for (i, expected) in [0., 150., 300., 450., 550.].iter().enumerate() {
        assert_eq!(energy[i].time, i as f64);
        assert_abs_diff_eq!(energy[i].energy, *expected, epsilon = 1e-9);
    }
    for pair in energy.windows(2) {
        assert!(pair[1].energy >= pair[0].energy);
    }
    assert_abs_diff_eq!(energy[4].energy, dc.energy_consumed());
}

#[test]
// Trace ending in zeros never lets the cloudlet finish, processing stops at the time limit.
fn test_time_limit_with_idle_trace() {
    let mut sim_config = SimulationConfig::new();
    sim_config.max_simulation_time = Some(10.);
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();
    dc.add_host("h", &small_host());
    let vm = dc.create_vm(&small_vm(), 0);
    let trace = TraceUtilizationModel::new(vec![1., 0., 0.], 1.).unwrap();
    let cloudlet = dc
        .new_cloudlet(1)
        .add_execution_stage(1_000_000.)
        .with_utilization_model(Box::new(trace));
    let cloudlet = dc.submit_cloudlet(cloudlet, vm);
    dc.step_until_no_events();

    assert_eq!(dc.current_time(), 10.);
    let record = dc.cloudlet_record(cloudlet).unwrap();
    assert_ne!(record.status, CloudletStatus::Success);
    assert_eq!(record.exec_finish, None);
    let energy = dc.energy_history();
    assert_eq!(energy.last().unwrap().time, 10.);
    assert_abs_diff_eq!(energy.last().unwrap().energy, dc.energy_consumed());
}

#[test]
// Workload from the config: chained services and a delayed job.
fn test_workload_from_config() {
    let sim_config = SimulationConfig::from_file(&name_wrapper("workload.yaml")).unwrap();
    let (mut dc, workload) = DatacenterSimulation::from_config(Simulation::new(123), sim_config).unwrap();
    assert_eq!(workload.vms.len(), 3);
    assert_eq!(workload.containers.len(), 1);
    assert_eq!(workload.cloudlets.len(), 3);
    dc.step_until_no_events();

    let records: Vec<_> = workload
        .cloudlets
        .iter()
        .map(|&id| dc.cloudlet_record(id).unwrap())
        .collect();
    for record in records.iter() {
        assert_eq!(record.status, CloudletStatus::Success);
    }
    // backend waits for the message sent by frontend once it is done
    assert!(records[1].exec_finish.unwrap() >= records[0].exec_finish.unwrap());
    assert_eq!(records[2].exec_start, Some(5.));
    assert_eq!(records[2].exec_finish, Some(8.));
    // both services share a host, so the message does not enter the network
    assert_eq!(dc.total_data_transfer(), 0);
    assert!(dc.datacenter().delivered_packets().is_empty());
}

#[test]
// Invalid workload is rejected as a whole, no guest or cloudlet is created.
fn test_invalid_workload_is_not_submitted() {
    let mut sim_config = SimulationConfig::from_file(&name_wrapper("workload.yaml")).unwrap();
    let workload = sim_config.workload.take().unwrap();
    let mut dc = DatacenterSimulation::new(Simulation::new(123), sim_config).unwrap();

    let mut bad_trace = workload.clone();
    bad_trace.services[1].utilization = Some(TraceSpec {
        samples: vec![0.5, 0.5],
        interval: 0.,
        per_pe: false,
    });
    assert!(matches!(
        submit_workload(&mut dc, &bad_trace),
        Err(ConfigurationError::InvalidTraceInterval(_))
    ));

    let mut bad_arrival = workload.clone();
    bad_arrival.jobs[0].arrival_time = -1.;
    assert!(matches!(
        submit_workload(&mut dc, &bad_arrival),
        Err(ConfigurationError::InvalidConfig(_))
    ));

    assert!(dc.datacenter().guest(0).is_none());
    dc.step_until_no_events();
    assert!(dc.cloudlet_records().is_empty());

    let submitted = submit_workload(&mut dc, &workload).unwrap();
    assert_eq!(submitted.vms.len(), 3);
    assert_eq!(submitted.cloudlets.len(), 3);
}
