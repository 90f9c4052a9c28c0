//! Guest allocation policies.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::common::{AllocationVerdict, GuestDemand, HostEntity};
use crate::core::config::options::{parse_config_value, parse_options};
use crate::core::config::sim_config::SimulationConfig;
use crate::core::error::ConfigurationError;
use crate::core::resource_pool::ResourcePool;
use crate::core::selection_policy::{
    selection_policy_resolver, GuestCandidate, HostCandidate, SelectionPolicy,
};

/// Single guest relocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationEntry {
    pub guest_id: u32,
    pub source_host: u32,
    pub target_host: u32,
}

pub type MigrationPlan = Vec<MigrationEntry>;

/// Guest state used for migration planning.
#[derive(Clone, Debug)]
pub struct GuestSnapshot {
    pub demand: GuestDemand,
    pub allocated_mips: f64,
    pub migratable: bool,
}

/// Host state used for migration planning.
#[derive(Clone, Debug)]
pub struct HostSnapshot {
    pub id: u32,
    pub pool: ResourcePool,
    /// CPU load in MIPS expected after migrations in progress complete.
    pub used_mips: f64,
    pub guests: Vec<GuestSnapshot>,
}

impl HostSnapshot {
    pub fn total_mips(&self) -> f64 {
        self.pool.total_mips()
    }

    pub fn utilization(&self) -> f64 {
        let total = self.total_mips();
        if total == 0. {
            return 0.;
        }
        self.used_mips / total
    }
}

/// Trait for implementation of guest allocation policies.
///
/// The policy gets the list of candidate hosts in a fixed order and returns an ID of host selected for the guest or
/// `None` if there is no suitable host. The policy does not keep any state about hosts between calls.
pub trait AllocationPolicy {
    fn find_host_for_guest(&mut self, demand: &GuestDemand, hosts: &[&dyn HostEntity]) -> Option<u32>;

    /// Computes guest migrations improving the current allocation.
    fn optimize_allocation(&mut self, _hosts: &[HostSnapshot]) -> MigrationPlan {
        Vec::new()
    }

    fn supports_migration(&self) -> bool {
        false
    }

    /// Host utilization above which the host is considered overloaded.
    fn overload_threshold(&self) -> f64 {
        1.
    }
}

/// Creates allocation policy from a config string: `FirstFit` or `Migration`.
///
/// Migration thresholds and selection policies are taken from the simulation config, thresholds can be overridden
/// by options, e.g. `Migration[upper=0.8,lower=0.2]`.
pub fn allocation_policy_resolver(
    config_str: &str,
    config: &SimulationConfig,
) -> Result<Box<dyn AllocationPolicy>, ConfigurationError> {
    let (name, options) = parse_config_value(config_str.trim());
    match name.as_str() {
        "FirstFit" => Ok(Box::new(FirstFitAllocationPolicy::new())),
        "Migration" => {
            let options = options.map(|o| parse_options(&o)).unwrap_or_default();
            let threshold = |key: &str, default: f64| -> Result<f64, ConfigurationError> {
                match options.get(key) {
                    Some(value) => value.trim().parse::<f64>().map_err(|_| ConfigurationError::InvalidOption {
                        config: config_str.to_string(),
                        option: format!("{}={}", key, value),
                    }),
                    None => Ok(default),
                }
            };
            let policy = MigrationAllocationPolicy::new(
                selection_policy_resolver(&config.guest_selection_policy)?,
                selection_policy_resolver(&config.host_selection_policy)?,
                threshold("upper", config.upper_threshold)?,
                threshold("lower", config.lower_threshold)?,
            )?;
            Ok(Box::new(policy))
        }
        _ => Err(ConfigurationError::InvalidConfig(format!(
            "unknown allocation policy: {}",
            config_str
        ))),
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Places the guest on the first suitable host.
#[derive(Default)]
pub struct FirstFitAllocationPolicy;

impl FirstFitAllocationPolicy {
    pub fn new() -> Self {
        Self {}
    }
}

impl AllocationPolicy for FirstFitAllocationPolicy {
    fn find_host_for_guest(&mut self, demand: &GuestDemand, hosts: &[&dyn HostEntity]) -> Option<u32> {
        hosts
            .iter()
            .find(|host| host.is_suitable_for_guest(demand))
            .map(|host| host.id())
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone)]
struct ShadowHost {
    id: u32,
    pool: ResourcePool,
    used_mips: f64,
    guest_count: usize,
}

impl ShadowHost {
    fn utilization_after(&self, mips: f64) -> f64 {
        let total = self.pool.total_mips();
        if total == 0. {
            return f64::INFINITY;
        }
        (self.used_mips + mips) / total
    }
}

/// Allocation policy which moves guests away from overloaded hosts and consolidates guests of underloaded hosts.
///
/// Host is overloaded when its utilization is above the upper threshold and underloaded when it is below the lower
/// threshold and runs some guests. With thresholds (0, 1) no migrations are ever planned.
pub struct MigrationAllocationPolicy {
    guest_selection: Box<dyn SelectionPolicy<GuestCandidate>>,
    host_selection: Box<dyn SelectionPolicy<HostCandidate>>,
    upper_threshold: f64,
    lower_threshold: f64,
}

impl MigrationAllocationPolicy {
    pub fn new(
        guest_selection: Box<dyn SelectionPolicy<GuestCandidate>>,
        host_selection: Box<dyn SelectionPolicy<HostCandidate>>,
        upper_threshold: f64,
        lower_threshold: f64,
    ) -> Result<Self, ConfigurationError> {
        if !(0. ..=1.).contains(&lower_threshold)
            || !(0. ..=1.).contains(&upper_threshold)
            || lower_threshold > upper_threshold
        {
            return Err(ConfigurationError::InvalidThresholds {
                lower: lower_threshold,
                upper: upper_threshold,
            });
        }
        Ok(Self {
            guest_selection,
            host_selection,
            upper_threshold,
            lower_threshold,
        })
    }

    pub fn upper_threshold(&self) -> f64 {
        self.upper_threshold
    }

    pub fn lower_threshold(&self) -> f64 {
        self.lower_threshold
    }

    /// Selects target host among shadow hosts, returns its index.
    fn select_target(
        &mut self,
        shadows: &[ShadowHost],
        guest: &GuestSnapshot,
        source: u32,
        excluded: &BTreeSet<u32>,
        active_only: bool,
    ) -> Option<usize> {
        let suitable: Vec<usize> = shadows
            .iter()
            .enumerate()
            .filter(|(_, h)| h.id != source && !excluded.contains(&h.id))
            .filter(|(_, h)| !active_only || h.guest_count > 0)
            .filter(|(_, h)| h.pool.can_allocate(&guest.demand) == AllocationVerdict::Success)
            .filter(|(_, h)| h.utilization_after(guest.allocated_mips) <= self.upper_threshold)
            .map(|(i, _)| i)
            .collect();
        let candidates: Vec<HostCandidate> = suitable
            .iter()
            .map(|&i| HostCandidate {
                id: shadows[i].id,
                used_mips: shadows[i].used_mips,
                total_mips: shadows[i].pool.total_mips(),
            })
            .collect();
        self.host_selection.select(&candidates).map(|i| suitable[i])
    }

    fn admit(shadows: &mut [ShadowHost], source: u32, target: usize, guest: &GuestSnapshot) {
        let shadow = &mut shadows[target];
        shadow.pool.guest_create(&guest.demand);
        shadow.used_mips += guest.allocated_mips;
        shadow.guest_count += 1;
        if let Some(source) = shadows.iter_mut().find(|h| h.id == source) {
            source.pool.guest_destroy(guest.demand.id);
            source.used_mips = (source.used_mips - guest.allocated_mips).max(0.);
            source.guest_count = source.guest_count.saturating_sub(1);
        }
    }

    fn plan_overloaded(
        &mut self,
        hosts: &[HostSnapshot],
        shadows: &mut Vec<ShadowHost>,
        overloaded: &BTreeSet<u32>,
        plan: &mut MigrationPlan,
        received: &mut BTreeSet<u32>,
    ) {
        for host in hosts.iter().filter(|h| overloaded.contains(&h.id)) {
            let mut candidates: Vec<(GuestCandidate, &GuestSnapshot)> = host
                .guests
                .iter()
                .filter(|g| g.migratable)
                .map(|g| {
                    (
                        GuestCandidate {
                            id: g.demand.id,
                            host_id: host.id,
                            allocated_mips: g.allocated_mips,
                            capacity_mips: g.demand.total_mips(),
                        },
                        g,
                    )
                })
                .collect();
            let total = host.total_mips();
            let mut projected = host.used_mips;
            let mut victims = Vec::new();
            while projected > self.upper_threshold * total && !candidates.is_empty() {
                let guest_candidates: Vec<GuestCandidate> = candidates.iter().map(|(c, _)| c.clone()).collect();
                let idx = match self.guest_selection.select(&guest_candidates) {
                    Some(idx) => idx,
                    None => break,
                };
                let (_, victim) = candidates.remove(idx);
                projected -= victim.allocated_mips;
                victims.push(victim);
            }
            for victim in victims {
                if let Some(target) = self.select_target(shadows, victim, host.id, overloaded, false) {
                    Self::admit(shadows, host.id, target, victim);
                    received.insert(shadows[target].id);
                    plan.push(MigrationEntry {
                        guest_id: victim.demand.id,
                        source_host: host.id,
                        target_host: shadows[target].id,
                    });
                }
            }
        }
    }

    fn plan_underloaded(
        &mut self,
        hosts: &[HostSnapshot],
        shadows: &mut Vec<ShadowHost>,
        overloaded: &BTreeSet<u32>,
        plan: &mut MigrationPlan,
        received: &mut BTreeSet<u32>,
    ) {
        let mut underloaded: Vec<&HostSnapshot> = hosts
            .iter()
            .filter(|h| !h.guests.is_empty() && h.utilization() < self.lower_threshold)
            .filter(|h| !overloaded.contains(&h.id))
            .collect();
        underloaded.sort_by(|a, b| a.utilization().total_cmp(&b.utilization()));
        let mut excluded: BTreeSet<u32> = overloaded.clone();
        excluded.extend(underloaded.iter().map(|h| h.id));

        for host in underloaded {
            if received.contains(&host.id) || host.guests.iter().any(|g| !g.migratable) {
                continue;
            }
            let backup = shadows.clone();
            let mut entries = Vec::new();
            let mut targets = Vec::new();
            for guest in host.guests.iter() {
                match self.select_target(shadows, guest, host.id, &excluded, true) {
                    Some(target) => {
                        Self::admit(shadows, host.id, target, guest);
                        targets.push(shadows[target].id);
                        entries.push(MigrationEntry {
                            guest_id: guest.demand.id,
                            source_host: host.id,
                            target_host: shadows[target].id,
                        });
                    }
                    None => {
                        entries.clear();
                        break;
                    }
                }
            }
            if entries.len() == host.guests.len() {
                plan.extend(entries);
                received.extend(targets);
            } else {
                *shadows = backup;
            }
        }
    }
}

impl AllocationPolicy for MigrationAllocationPolicy {
    fn find_host_for_guest(&mut self, demand: &GuestDemand, hosts: &[&dyn HostEntity]) -> Option<u32> {
        let suitable: Vec<HostCandidate> = hosts
            .iter()
            .filter(|host| host.is_suitable_for_guest(demand))
            .filter(|host| {
                let total = host.total_mips();
                total > 0. && (host.allocated_mips() + demand.total_mips()) / total <= self.upper_threshold
            })
            .map(|host| HostCandidate {
                id: host.id(),
                used_mips: host.allocated_mips(),
                total_mips: host.total_mips(),
            })
            .collect();
        self.host_selection.select(&suitable).map(|i| suitable[i].id)
    }

    fn optimize_allocation(&mut self, hosts: &[HostSnapshot]) -> MigrationPlan {
        let overloaded: BTreeSet<u32> = hosts
            .iter()
            .filter(|h| h.utilization() > self.upper_threshold)
            .map(|h| h.id)
            .collect();
        let mut shadows: Vec<ShadowHost> = hosts
            .iter()
            .map(|h| ShadowHost {
                id: h.id,
                pool: h.pool.clone(),
                used_mips: h.used_mips,
                guest_count: h.guests.len(),
            })
            .collect();
        let mut plan = Vec::new();
        let mut received = BTreeSet::new();
        self.plan_overloaded(hosts, &mut shadows, &overloaded, &mut plan, &mut received);
        if self.lower_threshold > 0. {
            self.plan_underloaded(hosts, &mut shadows, &overloaded, &mut plan, &mut received);
        }
        plan
    }

    fn supports_migration(&self) -> bool {
        true
    }

    fn overload_threshold(&self) -> f64 {
        self.upper_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::selection_policies::first_fit::FirstFitSelection;
    use crate::core::selection_policies::maximum_usage::MaximumUsageSelection;

    fn demand(id: u32, mips: f64) -> GuestDemand {
        GuestDemand {
            id,
            pes: 1,
            mips_per_pe: mips,
            ram: 10,
            bandwidth: 10,
            storage: 10,
        }
    }

    fn snapshot(id: u32, guests: &[(u32, f64)]) -> HostSnapshot {
        let mut pool = ResourcePool::uniform(2, 1000., 100, 100, 100);
        let mut snapshots = Vec::new();
        for &(guest_id, mips) in guests {
            pool.guest_create(&demand(guest_id, mips));
            snapshots.push(GuestSnapshot {
                demand: demand(guest_id, mips),
                allocated_mips: mips,
                migratable: true,
            });
        }
        HostSnapshot {
            id,
            pool,
            used_mips: guests.iter().map(|g| g.1).sum(),
            guests: snapshots,
        }
    }

    fn policy(upper: f64, lower: f64) -> MigrationAllocationPolicy {
        MigrationAllocationPolicy::new(
            Box::new(MaximumUsageSelection::new()),
            Box::new(FirstFitSelection::new()),
            upper,
            lower,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_thresholds() {
        for (upper, lower) in [(0.5, 0.6), (1.2, 0.), (0.5, -0.1)] {
            assert!(matches!(
                MigrationAllocationPolicy::new(
                    Box::new(MaximumUsageSelection::new()),
                    Box::new(FirstFitSelection::new()),
                    upper,
                    lower,
                ),
                Err(ConfigurationError::InvalidThresholds { .. })
            ));
        }
    }

    #[test]
    fn test_overloaded_host_sheds_largest_guest() {
        let hosts = vec![snapshot(0, &[(1, 900.), (2, 800.)]), snapshot(1, &[(3, 200.)])];
        let plan = policy(0.8, 0.).optimize_allocation(&hosts);
        assert_eq!(
            plan,
            vec![MigrationEntry {
                guest_id: 1,
                source_host: 0,
                target_host: 1
            }]
        );
    }

    #[test]
    fn test_no_migrations_with_full_range_thresholds() {
        let hosts = vec![snapshot(0, &[(1, 1000.), (2, 1000.)]), snapshot(1, &[(3, 10.)])];
        assert!(policy(1., 0.).optimize_allocation(&hosts).is_empty());
    }

    #[test]
    fn test_underloaded_host_is_emptied_all_or_nothing() {
        let hosts = vec![
            snapshot(0, &[(1, 100.)]),
            snapshot(1, &[(2, 800.)]),
            snapshot(2, &[(3, 100.), (4, 400.)]),
        ];
        // guest of host 0 fits into host 1, then only one of host 2 guests fits there
        let plan = policy(0.6, 0.3).optimize_allocation(&hosts);
        assert_eq!(
            plan,
            vec![MigrationEntry {
                guest_id: 1,
                source_host: 0,
                target_host: 1
            }]
        );
    }

    #[test]
    fn test_find_host_respects_upper_threshold() {
        let mut full = ResourcePool::uniform(2, 1000., 100, 100, 100);
        full.guest_create(&demand(1, 1000.));
        let host0 = TestHost { id: 0, pool: full };
        let host1 = TestHost {
            id: 1,
            pool: ResourcePool::uniform(2, 1000., 100, 100, 100),
        };
        let hosts: Vec<&dyn HostEntity> = vec![&host0, &host1];
        assert_eq!(policy(0.6, 0.).find_host_for_guest(&demand(5, 500.), &hosts), Some(1));
        assert_eq!(policy(1., 0.).find_host_for_guest(&demand(5, 500.), &hosts), Some(0));
        assert_eq!(
            FirstFitAllocationPolicy::new().find_host_for_guest(&demand(5, 1500.), &hosts),
            None
        );
    }

    struct TestHost {
        id: u32,
        pool: ResourcePool,
    }

    impl HostEntity for TestHost {
        fn id(&self) -> u32 {
            self.id
        }

        fn can_allocate(&self, demand: &GuestDemand) -> AllocationVerdict {
            self.pool.can_allocate(demand)
        }

        fn total_mips(&self) -> f64 {
            self.pool.total_mips()
        }

        fn allocated_mips(&self) -> f64 {
            self.pool.allocated_mips()
        }

        fn guest_ids(&self) -> Vec<u32> {
            self.pool.guests().to_vec()
        }
    }
}
