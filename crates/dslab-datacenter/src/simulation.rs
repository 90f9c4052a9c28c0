//! Simulation facade: builds the datacenter, submits guests and cloudlets and exposes results.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use sugars::{rc, refcell};

use dslab_core::{Simulation, SimulationContext};

use crate::core::allocation_policy::allocation_policy_resolver;
use crate::core::cloudlet::{Cloudlet, CloudletRecord};
use crate::core::config::sim_config::{HostSpec, SimulationConfig, TopologySpec};
use crate::core::datacenter::{Datacenter, GuestParent};
use crate::core::energy_meter::EnergyRecord;
use crate::core::error::ConfigurationError;
use crate::core::events::cloudlet::CloudletSubmit;
use crate::core::events::guest::{GuestCreateRequest, GuestDestroyRequest};
use crate::core::guest::GuestKind;
use crate::core::host::HostStateRecord;
use crate::core::network::switch::SwitchLevel;
use crate::core::resource_pool::ResourcePool;
use crate::workload::{submit_workload, GuestResources, SubmittedWorkload};

pub struct DatacenterSimulation {
    datacenter: Rc<RefCell<Datacenter>>,
    datacenter_id: u32,
    sim: Simulation,
    ctx: SimulationContext,
    sim_config: Rc<SimulationConfig>,
}

impl DatacenterSimulation {
    /// Creates the datacenter with hosts and network described in the config.
    pub fn new(mut sim: Simulation, sim_config: SimulationConfig) -> Result<Self, ConfigurationError> {
        let vm_policy = allocation_policy_resolver(&sim_config.vm_allocation_policy, &sim_config)?;
        let container_policy = allocation_policy_resolver(&sim_config.container_allocation_policy, &sim_config)?;
        let sim_config = rc!(sim_config);
        let datacenter = rc!(refcell!(Datacenter::new(
            vm_policy,
            container_policy,
            sim.create_context("datacenter"),
            sim_config.clone(),
        )));
        let datacenter_id = sim.add_handler("datacenter", datacenter.clone());
        let ctx = sim.create_context("simulation");
        let mut simulation = Self {
            datacenter,
            datacenter_id,
            sim,
            ctx,
            sim_config: sim_config.clone(),
        };
        for spec in sim_config.hosts.iter() {
            simulation.add_hosts(spec);
        }
        simulation.build_topology(&sim_config.topology)?;
        Ok(simulation)
    }

    /// Creates the datacenter and submits the workload from the config, if any.
    pub fn from_config(sim: Simulation, sim_config: SimulationConfig) -> Result<(Self, SubmittedWorkload), ConfigurationError> {
        let workload = sim_config.workload.clone();
        let mut simulation = Self::new(sim, sim_config)?;
        let submitted = match workload {
            Some(workload) => submit_workload(&mut simulation, &workload)?,
            None => SubmittedWorkload::default(),
        };
        Ok((simulation, submitted))
    }

    // INFRASTRUCTURE //////////////////////////////////////////////////////////////////////////////

    pub fn add_host(&mut self, name: &str, spec: &HostSpec) -> u32 {
        let pool = ResourcePool::uniform(spec.pe_count, spec.mips_per_pe, spec.ram, spec.bandwidth, spec.storage);
        self.datacenter
            .borrow_mut()
            .add_host(name, pool, spec.power_model.build())
    }

    /// Adds `spec.count` identical hosts, returns their IDs.
    pub fn add_hosts(&mut self, spec: &HostSpec) -> Vec<u32> {
        let first_id = self.datacenter.borrow().hosts().count() as u32;
        spec.host_names(first_id)
            .iter()
            .map(|name| self.add_host(name, spec))
            .collect()
    }

    pub fn add_switch(
        &mut self,
        name: &str,
        level: SwitchLevel,
        port_count: u32,
        uplink_bandwidth: f64,
        downlink_bandwidth: f64,
    ) -> u32 {
        self.datacenter
            .borrow_mut()
            .add_switch(name, level, port_count, uplink_bandwidth, downlink_bandwidth)
    }

    pub fn attach_host(&mut self, switch_id: u32, host_id: u32) -> Result<(), ConfigurationError> {
        self.datacenter.borrow_mut().attach_host(switch_id, host_id)
    }

    pub fn attach_switches(&mut self, first: u32, second: u32) -> Result<(), ConfigurationError> {
        self.datacenter.borrow_mut().attach_switches(first, second)
    }

    /// Creates switches and links, hosts and switches are referenced by names.
    pub fn build_topology(&mut self, spec: &TopologySpec) -> Result<(), ConfigurationError> {
        for switch in spec.switches.iter() {
            self.add_switch(
                &switch.name,
                switch.level,
                switch.port_count,
                switch.uplink_bandwidth,
                switch.downlink_bandwidth,
            );
        }
        for (first, second) in spec.switch_links.iter() {
            let first = self.switch_id(first)?;
            let second = self.switch_id(second)?;
            self.attach_switches(first, second)?;
        }
        for (switch, host) in spec.host_links.iter() {
            let switch_id = self.switch_id(switch)?;
            let host_id = self
                .host_id(host)
                .ok_or_else(|| ConfigurationError::InvalidConfig(format!("unknown host name: {}", host)))?;
            self.attach_host(switch_id, host_id)?;
        }
        Ok(())
    }

    fn switch_id(&self, name: &str) -> Result<u32, ConfigurationError> {
        self.datacenter
            .borrow()
            .topology()
            .switch_by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| ConfigurationError::InvalidConfig(format!("unknown switch name: {}", name)))
    }

    /// Returns ID of host with given name.
    pub fn host_id(&self, name: &str) -> Option<u32> {
        self.datacenter.borrow().hosts().find(|h| h.name == name).map(|h| h.id)
    }

    // GUESTS //////////////////////////////////////////////////////////////////////////////////////

    /// Registers guest and requests its placement after `delay`, returns guest ID.
    pub fn create_guest(
        &mut self,
        kind: GuestKind,
        resources: &GuestResources,
        owner: u32,
        parent: Option<GuestParent>,
        delay: f64,
    ) -> u32 {
        let guest_id = self
            .datacenter
            .borrow_mut()
            .register_guest(kind, owner, resources.demand(), parent);
        self.ctx.emit(GuestCreateRequest { guest_id }, self.datacenter_id, delay);
        guest_id
    }

    /// Creates VM placed by the VM allocation policy.
    pub fn create_vm(&mut self, resources: &GuestResources, owner: u32) -> u32 {
        self.create_guest(GuestKind::VirtualMachine, resources, owner, None, 0.)
    }

    pub fn create_vm_with_delay(&mut self, resources: &GuestResources, owner: u32, delay: f64) -> u32 {
        self.create_guest(GuestKind::VirtualMachine, resources, owner, None, delay)
    }

    /// Creates VM on the given host bypassing the allocation policy.
    pub fn create_vm_on_host(&mut self, resources: &GuestResources, owner: u32, host_id: u32) -> u32 {
        self.create_guest(
            GuestKind::VirtualMachine,
            resources,
            owner,
            Some(GuestParent::Host(host_id)),
            0.,
        )
    }

    /// Creates container inside the given VM or, if `vm_id` is `None`, on a VM chosen by the container
    /// allocation policy.
    pub fn create_container(&mut self, resources: &GuestResources, owner: u32, vm_id: Option<u32>) -> u32 {
        self.create_guest(GuestKind::Container, resources, owner, vm_id.map(GuestParent::Guest), 0.)
    }

    pub fn create_container_with_delay(
        &mut self,
        resources: &GuestResources,
        owner: u32,
        vm_id: Option<u32>,
        delay: f64,
    ) -> u32 {
        self.create_guest(GuestKind::Container, resources, owner, vm_id.map(GuestParent::Guest), delay)
    }

    /// Destroys guest with all nested guests after `delay`.
    pub fn destroy_guest(&mut self, guest_id: u32, delay: f64) {
        self.ctx.emit(GuestDestroyRequest { guest_id }, self.datacenter_id, delay);
    }

    // CLOUDLETS ///////////////////////////////////////////////////////////////////////////////////

    /// Returns a new cloudlet with a fresh ID, stages are added by the caller.
    pub fn new_cloudlet(&mut self, pes: u32) -> Cloudlet {
        let id = self.datacenter.borrow_mut().next_cloudlet_id();
        Cloudlet::new(id, pes)
    }

    /// Reserves a cloudlet ID, useful when cloudlets reference each other.
    pub fn reserve_cloudlet_id(&mut self) -> u32 {
        self.datacenter.borrow_mut().next_cloudlet_id()
    }

    pub fn submit_cloudlet(&mut self, cloudlet: Cloudlet, guest_id: u32) -> u32 {
        self.submit_cloudlet_with_delay(cloudlet, guest_id, 0.)
    }

    pub fn submit_cloudlet_with_delay(&mut self, cloudlet: Cloudlet, guest_id: u32, delay: f64) -> u32 {
        let cloudlet_id = cloudlet.id;
        self.datacenter.borrow_mut().add_cloudlet(cloudlet, guest_id);
        self.ctx
            .emit(CloudletSubmit { cloudlet_id, guest_id }, self.datacenter_id, delay);
        cloudlet_id
    }

    // SIMULATION //////////////////////////////////////////////////////////////////////////////////

    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    pub fn step_for_duration(&mut self, duration: f64) {
        self.sim.step_for_duration(duration);
    }

    /// Processes all events with time not greater than the given one.
    pub fn step_until_time(&mut self, time: f64) {
        let now = self.sim.time();
        if time >= now {
            self.sim.step_for_duration(time - now);
        }
    }

    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn current_time(&self) -> f64 {
        self.sim.time()
    }

    // RESULTS /////////////////////////////////////////////////////////////////////////////////////

    pub fn datacenter(&self) -> Ref<Datacenter> {
        self.datacenter.borrow()
    }

    pub fn datacenter_id(&self) -> u32 {
        self.datacenter_id
    }

    pub fn sim_config(&self) -> Rc<SimulationConfig> {
        self.sim_config.clone()
    }

    pub fn cloudlet_records(&self) -> Vec<CloudletRecord> {
        self.datacenter.borrow().cloudlet_records()
    }

    pub fn cloudlet_record(&self, cloudlet_id: u32) -> Option<CloudletRecord> {
        self.datacenter.borrow().cloudlet_record(cloudlet_id)
    }

    /// Energy consumed by all hosts in Joules.
    pub fn energy_consumed(&self) -> f64 {
        self.datacenter.borrow().energy_consumed()
    }

    /// Bytes sent between hosts.
    pub fn total_data_transfer(&self) -> u64 {
        self.datacenter.borrow().total_data_transfer()
    }

    pub fn energy_history(&self) -> Vec<EnergyRecord> {
        self.datacenter.borrow().energy_history().to_vec()
    }

    pub fn host_utilization_history(&self, host_id: u32) -> Vec<HostStateRecord> {
        self.datacenter.borrow().host_utilization_history(host_id).to_vec()
    }

    pub fn guest_host(&self, guest_id: u32) -> Option<u32> {
        self.datacenter.borrow().guest_host(guest_id)
    }

    pub fn migration_count(&self) -> u64 {
        self.datacenter.borrow().migration_count()
    }

    pub fn rejected_migration_count(&self) -> u64 {
        self.datacenter.borrow().rejected_migration_count()
    }

    pub fn unplaceable_guests(&self) -> Vec<u32> {
        self.datacenter.borrow().unplaceable_guests()
    }

    pub fn dropped_packet_count(&self) -> u64 {
        self.datacenter.borrow().dropped_packet_count()
    }
}
