use std::time::Instant;

use clap::Parser;
use log::info;
use serde::Serialize;

use dslab_core::Simulation;
use dslab_datacenter::core::cloudlet::CloudletStatus;
use dslab_datacenter::core::config::sim_config::SimulationConfig;
use dslab_datacenter::simulation::DatacenterSimulation;

fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to simulation config with hosts, topology and workload
    #[clap(short, long)]
    config: String,

    /// Output CSV file with host utilization and power over time
    #[clap(short, long)]
    output: Option<String>,

    /// Output CSV file with cumulative energy consumption over time
    #[clap(long)]
    energy_output: Option<String>,

    /// Simulated time limit, overrides the one from config
    #[clap(long)]
    max_time: Option<f64>,

    /// Random seed
    #[clap(short, long, default_value_t = 123)]
    seed: u64,
}

#[derive(Serialize)]
struct HostRow<'a> {
    host: &'a str,
    time: f64,
    utilization: f64,
    power: f64,
}

fn main() {
    init_logger();
    let args = Args::parse();

    let mut sim_config = match SimulationConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("can't load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(max_time) = args.max_time {
        sim_config.max_simulation_time = Some(max_time);
    }
    let (mut dc, workload) = match DatacenterSimulation::from_config(Simulation::new(args.seed), sim_config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let t = Instant::now();
    dc.step_until_no_events();
    let elapsed = t.elapsed().as_secs_f64();

    let records = dc.cloudlet_records();
    let succeeded = records.iter().filter(|r| r.status == CloudletStatus::Success).count();
    let makespan = records.iter().filter_map(|r| r.exec_finish).fold(0., f64::max);
    info!(
        "Simulated {:.2} s in {:.2} s ({} events, {:.0} events/s)",
        dc.current_time(),
        elapsed,
        dc.event_count(),
        dc.event_count() as f64 / elapsed
    );
    println!(
        "Guests: {} VMs, {} containers, {} unplaceable",
        workload.vms.len(),
        workload.containers.len(),
        dc.unplaceable_guests().len()
    );
    println!("Cloudlets: {} of {} succeeded, makespan {:.2}", succeeded, records.len(), makespan);
    for record in records.iter() {
        println!(
            "  cloudlet #{} {:?} on host {:?} [{:?} - {:?}]",
            record.id, record.status, record.host_id, record.exec_start, record.exec_finish
        );
    }
    println!(
        "Migrations: {} completed, {} rejected",
        dc.migration_count(),
        dc.rejected_migration_count()
    );
    println!(
        "Network: {} bytes transferred, {} packets dropped",
        dc.total_data_transfer(),
        dc.dropped_packet_count()
    );
    println!("Energy consumed: {:.2} J", dc.energy_consumed());

    if let Some(output) = args.output {
        if let Err(e) = write_host_history(&dc, &output) {
            eprintln!("can't write {}: {}", output, e);
            std::process::exit(1);
        }
        info!("Host history is saved to {}", output);
    }
    if let Some(output) = args.energy_output {
        if let Err(e) = write_energy_history(&dc, &output) {
            eprintln!("can't write {}: {}", output, e);
            std::process::exit(1);
        }
        info!("Energy history is saved to {}", output);
    }
}

fn write_host_history(dc: &DatacenterSimulation, path: &str) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    let datacenter = dc.datacenter();
    for host in datacenter.hosts() {
        for record in datacenter.host_utilization_history(host.id) {
            writer.serialize(HostRow {
                host: &host.name,
                time: record.time,
                utilization: record.utilization,
                power: record.power,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_energy_history(dc: &DatacenterSimulation, path: &str) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in dc.energy_history() {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
