//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigurationError;
use crate::core::network::switch::SwitchLevel;
use crate::core::power_model::PowerModelParams;
use crate::core::utilization_model::InterpolationMode;
use crate::workload::WorkloadSpec;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawSimulationConfig {
    pub scheduling_interval: Option<f64>,
    pub optimization_interval: Option<f64>,
    pub allocation_retry_period: Option<f64>,
    pub guest_allocation_timeout: Option<f64>,
    pub switching_delay: Option<f64>,
    pub virtualization_overhead: Option<f64>,
    pub destroy_finished_guests: Option<bool>,
    pub vm_allocation_policy: Option<String>,
    pub container_allocation_policy: Option<String>,
    pub guest_selection_policy: Option<String>,
    pub host_selection_policy: Option<String>,
    pub upper_threshold: Option<f64>,
    pub lower_threshold: Option<f64>,
    pub interpolation: Option<InterpolationMode>,
    pub max_simulation_time: Option<f64>,
    pub hosts: Option<Vec<RawHostConfig>>,
    pub topology: Option<TopologySpec>,
    pub workload: Option<WorkloadSpec>,
}

/// Power model section of host config, the shape is given by name.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawPowerModelConfig {
    pub shape: String,
    pub max_power: f64,
    pub idle_power_fraction: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawHostConfig {
    pub name: Option<String>,
    pub name_prefix: Option<String>,
    pub count: Option<u32>,
    pub pe_count: u32,
    pub mips_per_pe: f64,
    pub ram: u64,
    pub bandwidth: u64,
    pub storage: u64,
    pub power_model: Option<RawPowerModelConfig>,
}

/// Holds configuration of a single physical host or a set of identical hosts.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostSpec {
    /// Host name.
    /// Should be set if count = 1.
    pub name: Option<String>,
    /// Host name prefix.
    /// Full name is produced by appending host instance number to the prefix.
    /// Should be set if count > 1.
    pub name_prefix: Option<String>,
    /// Number of such hosts.
    pub count: u32,
    pub pe_count: u32,
    /// Rating of each PE.
    pub mips_per_pe: f64,
    /// RAM capacity in MB.
    pub ram: u64,
    /// Network bandwidth in bits per second.
    pub bandwidth: u64,
    pub storage: u64,
    pub power_model: PowerModelParams,
}

impl HostSpec {
    pub fn new(pe_count: u32, mips_per_pe: f64, ram: u64, bandwidth: u64, storage: u64) -> Self {
        Self {
            name: None,
            name_prefix: None,
            count: 1,
            pe_count,
            mips_per_pe,
            ram,
            bandwidth,
            storage,
            power_model: PowerModelParams::default(),
        }
    }

    pub fn with_power_model(mut self, power_model: PowerModelParams) -> Self {
        self.power_model = power_model;
        self
    }

    /// Returns names of hosts described by the spec, `first_id` is used to name hosts without explicit names.
    pub fn host_names(&self, first_id: u32) -> Vec<String> {
        if self.count == 1 {
            if let Some(name) = &self.name {
                return vec![name.clone()];
            }
        }
        let prefix = self.name_prefix.clone().unwrap_or_else(|| "host".to_string());
        (0..self.count)
            .map(|i| {
                if self.name_prefix.is_some() {
                    format!("{}{}", prefix, i)
                } else {
                    format!("{}{}", prefix, first_id + i)
                }
            })
            .collect()
    }
}

/// Holds configuration of a single switch.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SwitchSpec {
    pub name: String,
    pub level: SwitchLevel,
    pub port_count: u32,
    /// Bandwidth of links to upper level switches in bits per second.
    pub uplink_bandwidth: f64,
    /// Bandwidth of links to lower level switches or hosts in bits per second.
    pub downlink_bandwidth: f64,
}

/// Holds configuration of datacenter network.
///
/// Hosts and switches in links are referenced by names.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct TopologySpec {
    #[serde(default)]
    pub switches: Vec<SwitchSpec>,
    /// Pairs of (edge switch, host).
    #[serde(default)]
    pub host_links: Vec<(String, String)>,
    /// Pairs of switches at adjacent levels.
    #[serde(default)]
    pub switch_links: Vec<(String, String)>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Period in seconds between host processing updates.
    pub scheduling_interval: f64,
    /// Period in seconds between allocation optimizations (for migration-aware policies).
    pub optimization_interval: f64,
    /// Period in seconds for waiting before retrying failed guest allocation.
    pub allocation_retry_period: f64,
    /// Timeout in seconds after which unallocated guest becomes failed.
    pub guest_allocation_timeout: f64,
    /// Delay in seconds added to each packet forwarded by a switch.
    pub switching_delay: f64,
    /// Delay in seconds added to packets for each nested virtualization layer at sender and receiver.
    pub virtualization_overhead: f64,
    /// Whether to destroy guests once all their cloudlets are done.
    pub destroy_finished_guests: bool,
    /// Policy placing VMs on hosts: `FirstFit` or `Migration`.
    pub vm_allocation_policy: String,
    /// Policy placing containers on VMs.
    pub container_allocation_policy: String,
    /// Selection of guests to migrate from overloaded hosts.
    pub guest_selection_policy: String,
    /// Selection of hosts to place migrating guests.
    pub host_selection_policy: String,
    /// Host is overloaded when its CPU utilization is above this value.
    pub upper_threshold: f64,
    /// Host is underloaded when its CPU utilization is below this value.
    pub lower_threshold: f64,
    /// Interpolation used by trace utilization models built from workload config.
    pub interpolation: InterpolationMode,
    /// Simulated time after which the datacenter stops processing updates, unlimited if not set.
    pub max_simulation_time: Option<f64>,
    /// Configurations of physical hosts.
    pub hosts: Vec<HostSpec>,
    /// Datacenter network.
    pub topology: TopologySpec,
    /// Guests and cloudlets to simulate.
    pub workload: Option<WorkloadSpec>,
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self {
            scheduling_interval: 1.,
            optimization_interval: 1.,
            allocation_retry_period: 1.,
            guest_allocation_timeout: 50.,
            switching_delay: 0.,
            virtualization_overhead: 0.,
            destroy_finished_guests: true,
            vm_allocation_policy: "FirstFit".to_string(),
            container_allocation_policy: "FirstFit".to_string(),
            guest_selection_policy: "MaximumUsage".to_string(),
            host_selection_policy: "FirstFit".to_string(),
            upper_threshold: 1.,
            lower_threshold: 0.,
            interpolation: InterpolationMode::Linear,
            max_simulation_time: None,
            hosts: Vec::new(),
            topology: TopologySpec::default(),
            workload: None,
        }
    }

    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(file_name)
            .map_err(|e| ConfigurationError::InvalidConfig(format!("can't read file {}: {}", file_name, e)))?;
        Self::from_yaml(&content)
    }

    /// Creates simulation config from YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigurationError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigurationError::InvalidConfig(format!("can't parse YAML: {}", e)))?;
        let default = Self::new();
        let scheduling_interval = raw.scheduling_interval.unwrap_or(default.scheduling_interval);
        if scheduling_interval <= 0. {
            return Err(ConfigurationError::InvalidConfig(
                "scheduling_interval must be positive".to_string(),
            ));
        }

        if let Some(limit) = raw.max_simulation_time {
            if !(limit > 0.) {
                return Err(ConfigurationError::InvalidConfig(
                    "max_simulation_time must be positive".to_string(),
                ));
            }
        }

        let mut hosts = Vec::new();
        for host in raw.hosts.unwrap_or_default() {
            let power_model = match host.power_model {
                Some(pm) => PowerModelParams::from_shape_name(&pm.shape, pm.max_power, pm.idle_power_fraction)?,
                None => PowerModelParams::default(),
            };
            hosts.push(HostSpec {
                name: host.name,
                name_prefix: host.name_prefix,
                count: host.count.unwrap_or(1),
                pe_count: host.pe_count,
                mips_per_pe: host.mips_per_pe,
                ram: host.ram,
                bandwidth: host.bandwidth,
                storage: host.storage,
                power_model,
            });
        }

        Ok(Self {
            scheduling_interval,
            optimization_interval: raw.optimization_interval.unwrap_or(scheduling_interval),
            allocation_retry_period: raw.allocation_retry_period.unwrap_or(default.allocation_retry_period),
            guest_allocation_timeout: raw.guest_allocation_timeout.unwrap_or(default.guest_allocation_timeout),
            switching_delay: raw.switching_delay.unwrap_or(default.switching_delay),
            virtualization_overhead: raw.virtualization_overhead.unwrap_or(default.virtualization_overhead),
            destroy_finished_guests: raw.destroy_finished_guests.unwrap_or(default.destroy_finished_guests),
            vm_allocation_policy: raw.vm_allocation_policy.unwrap_or(default.vm_allocation_policy),
            container_allocation_policy: raw
                .container_allocation_policy
                .unwrap_or(default.container_allocation_policy),
            guest_selection_policy: raw.guest_selection_policy.unwrap_or(default.guest_selection_policy),
            host_selection_policy: raw.host_selection_policy.unwrap_or(default.host_selection_policy),
            upper_threshold: raw.upper_threshold.unwrap_or(default.upper_threshold),
            lower_threshold: raw.lower_threshold.unwrap_or(default.lower_threshold),
            interpolation: raw.interpolation.unwrap_or(default.interpolation),
            max_simulation_time: raw.max_simulation_time,
            hosts,
            topology: raw.topology.unwrap_or_default(),
            workload: raw.workload,
        })
    }

    /// Returns total hosts count.
    pub fn number_of_hosts(&self) -> u32 {
        self.hosts.iter().map(|h| h.count).sum()
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}
