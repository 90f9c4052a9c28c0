//! Typed workload descriptions: chained microservices and job arrivals.

use serde::{Deserialize, Serialize};

use crate::core::cloudlet::Cloudlet;
use crate::core::common::GuestDemand;
use crate::core::error::ConfigurationError;
use crate::core::utilization_model::{InterpolationMode, TraceUtilizationModel, UtilizationModel};
use crate::simulation::DatacenterSimulation;

/// Resources requested by a guest. RAM is in MB, bandwidth in bits per second.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct GuestResources {
    pub pes: u32,
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bandwidth: u64,
    pub storage: u64,
}

impl GuestResources {
    pub fn new(pes: u32, mips_per_pe: f64, ram: u64, bandwidth: u64, storage: u64) -> Self {
        Self {
            pes,
            mips_per_pe,
            ram,
            bandwidth,
            storage,
        }
    }

    /// Demand with unassigned guest ID.
    pub fn demand(&self) -> GuestDemand {
        GuestDemand {
            id: 0,
            pes: self.pes,
            mips_per_pe: self.mips_per_pe,
            ram: self.ram,
            bandwidth: self.bandwidth,
            storage: self.storage,
        }
    }
}

/// CPU utilization trace sampled with a fixed interval.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct TraceSpec {
    pub samples: Vec<f64>,
    pub interval: f64,
    /// Samples are given per PE, otherwise they describe the whole service and are divided by PE count.
    #[serde(default)]
    pub per_pe: bool,
}

fn default_cloudlet_pes() -> u32 {
    1
}

fn default_message_size() -> u64 {
    100
}

/// A service of the chained workflow.
///
/// Each service runs one cloudlet inside its VM (or inside a container nested into the VM), the cloudlet computes,
/// receives a message from the previous service and sends a message to the next one.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub vm: GuestResources,
    #[serde(default)]
    pub container: Option<GuestResources>,
    #[serde(default = "default_cloudlet_pes")]
    pub cloudlet_pes: u32,
    /// Length of the compute stage in millions of instructions.
    pub compute_length: f64,
    #[serde(default)]
    pub utilization: Option<TraceSpec>,
    /// Size of the message sent to the next service in bytes.
    #[serde(default = "default_message_size")]
    pub message_size: u64,
}

/// A batch job arriving at the given time in its own VM.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct JobSpec {
    pub arrival_time: f64,
    pub length: f64,
    #[serde(default = "default_cloudlet_pes")]
    pub pes: u32,
    pub vm: GuestResources,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub owner: u32,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

/// IDs of guests and cloudlets created for a workload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmittedWorkload {
    pub vms: Vec<u32>,
    pub containers: Vec<u32>,
    pub cloudlets: Vec<u32>,
}

/// Creates guests and cloudlets of the workload.
///
/// The workload is validated before anything is submitted, so on error the simulation is left untouched.
pub fn submit_workload(
    sim: &mut DatacenterSimulation,
    workload: &WorkloadSpec,
) -> Result<SubmittedWorkload, ConfigurationError> {
    for job in workload.jobs.iter() {
        if !(job.arrival_time >= 0. && job.arrival_time.is_finite()) {
            return Err(ConfigurationError::InvalidConfig(format!(
                "job arrival time must be non-negative, got {}",
                job.arrival_time
            )));
        }
    }
    let interpolation = sim.sim_config().interpolation;
    let models = workload
        .services
        .iter()
        .map(|service| service_utilization_model(service, interpolation))
        .collect::<Result<Vec<_>, _>>()?;

    let mut submitted = SubmittedWorkload::default();
    submit_service_chain(sim, workload, models, &mut submitted);
    for job in workload.jobs.iter() {
        let vm_id = sim.create_vm_with_delay(&job.vm, workload.owner, job.arrival_time);
        let cloudlet = sim.new_cloudlet(job.pes).add_execution_stage(job.length);
        let cloudlet_id = sim.submit_cloudlet_with_delay(cloudlet, vm_id, job.arrival_time);
        submitted.vms.push(vm_id);
        submitted.cloudlets.push(cloudlet_id);
    }
    Ok(submitted)
}

fn service_utilization_model(
    service: &ServiceSpec,
    interpolation: InterpolationMode,
) -> Result<Option<Box<dyn UtilizationModel>>, ConfigurationError> {
    let trace = match &service.utilization {
        Some(trace) => trace,
        None => return Ok(None),
    };
    let model = if trace.per_pe {
        TraceUtilizationModel::new(trace.samples.clone(), trace.interval)
    } else {
        TraceUtilizationModel::from_service_trace(trace.samples.clone(), trace.interval, service.cloudlet_pes)
    }?;
    Ok(Some(Box::new(model.with_interpolation(interpolation))))
}

fn submit_service_chain(
    sim: &mut DatacenterSimulation,
    workload: &WorkloadSpec,
    models: Vec<Option<Box<dyn UtilizationModel>>>,
    submitted: &mut SubmittedWorkload,
) {
    let services = &workload.services;
    let cloudlet_ids: Vec<u32> = services.iter().map(|_| sim.reserve_cloudlet_id()).collect();

    for (i, (service, model)) in services.iter().zip(models).enumerate() {
        let vm_id = sim.create_vm(&service.vm, workload.owner);
        submitted.vms.push(vm_id);
        let guest_id = match &service.container {
            Some(container) => {
                let container_id = sim.create_container(container, workload.owner, Some(vm_id));
                submitted.containers.push(container_id);
                container_id
            }
            None => vm_id,
        };

        let mut cloudlet =
            Cloudlet::new(cloudlet_ids[i], service.cloudlet_pes).add_execution_stage(service.compute_length);
        if i > 0 {
            cloudlet = cloudlet.add_recv_stage(cloudlet_ids[i - 1]);
        }
        if i + 1 < services.len() {
            cloudlet = cloudlet.add_send_stage(cloudlet_ids[i + 1], service.message_size);
        }
        if let Some(model) = model {
            cloudlet = cloudlet.with_utilization_model(model);
        }
        let cloudlet_id = sim.submit_cloudlet(cloudlet, guest_id);
        submitted.cloudlets.push(cloudlet_id);
    }
}
