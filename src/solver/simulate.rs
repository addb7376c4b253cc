use std::env;
use std::error::Error;
use std::fs;

use chrono::NaiveTime;
use colored::*;
use csv::Writer;
use dotenv::dotenv;
use tracing::{info, span, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::constant::{DELIVERY_LOG_PATH, SUMMARY_PATH};
use crate::config::DispatchConfig;
use crate::domain::registry::PackageRegistry;
use crate::domain::types::DeliveryStatus;
use crate::evaluation::status::{PackageSnapshot, StatusResolver};
use crate::fixtures::data_generator::{wgups_scenario, Scenario};
use crate::setup::init::{load_corrections, load_distance_table, load_packages, register};
use crate::solver::dispatch::{DispatchReport, Dispatcher};
use crate::utils::{format_time, parse_time_of_day, time_of_day};

/// Initialize tracing and environment
fn init_tracing_and_env() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            fmt::layer()
                .with_span_events(fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE)
                .pretty(),
        )
        .init();

    dotenv().ok();
    Ok(())
}

/// Load the day from CSV files named in the environment, or fall back to
/// the built-in 40-package fixture.
fn load_scenario(config: DispatchConfig) -> Result<Scenario, Box<dyn Error>> {
    let paths = (
        env::var("WGUPS_ADDRESSES_CSV"),
        env::var("WGUPS_DISTANCES_CSV"),
        env::var("WGUPS_PACKAGES_CSV"),
    );
    let (Ok(addresses), Ok(distances), Ok(packages)) = paths else {
        info!("No input files configured, using the built-in package list");
        let scenario = wgups_scenario()?;
        return Ok(Scenario { config, ..scenario });
    };

    let table = load_distance_table(&addresses, &distances)?;
    let packages = load_packages(&packages)?;
    let corrections = match env::var("WGUPS_CORRECTIONS_CSV") {
        Ok(path) => load_corrections(path)?,
        Err(_) => vec![],
    };
    info!(
        "Loaded {} packages and {} corrections from disk",
        packages.len(),
        corrections.len()
    );
    Ok(Scenario {
        table,
        registry: register(packages, corrections)?,
        config,
    })
}

fn query_times() -> Vec<NaiveTime> {
    let defaults = vec![time_of_day(9, 0), time_of_day(10, 0), time_of_day(12, 30)];
    let Ok(raw) = env::var("WGUPS_QUERY_TIMES") else {
        return defaults;
    };
    let parsed: Vec<NaiveTime> = raw
        .split(',')
        .filter_map(|t| match parse_time_of_day(t) {
            Ok(time) => Some(time),
            Err(err) => {
                warn!("Skipping query time: {}", err);
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        defaults
    } else {
        parsed
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    init_tracing_and_env()?;
    let config = DispatchConfig::from_env();

    let Scenario {
        table,
        mut registry,
        config,
    } = {
        let span = span!(Level::INFO, "setup");
        let _guard = span.enter();
        load_scenario(config)?
    };

    info!(
        "Starting dispatch of {} packages on {} trucks",
        registry.len(),
        config.truck_count
    );
    let dispatcher = Dispatcher::new(&table, config)?;
    let report = dispatcher.run(&mut registry)?;

    print_report(&report);
    let resolver = StatusResolver::new(&registry);
    for time in query_times() {
        print_snapshot(time, &resolver.snapshot_all(time));
    }

    save_to_csv(&registry, DELIVERY_LOG_PATH)?;
    save_summary(&report, SUMMARY_PATH)?;
    Ok(())
}

fn print_report(report: &DispatchReport) {
    for truck in &report.trucks {
        info!(
            "Truck {}: {:.1} miles, {} packages, legs leaving at [{}]",
            truck.id,
            truck.mileage(),
            truck.package_count(),
            truck
                .legs()
                .iter()
                .map(|l| format_time(l.departure))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let total = format!("Total mileage: {:.1}", report.total_mileage);
    if report.within_mileage_budget() {
        println!("{} (budget {:.1})", total.green(), report.mileage_budget);
    } else {
        println!("{} (budget {:.1})", total.red(), report.mileage_budget);
    }
    for miss in &report.deadline_misses {
        warn!(
            "Package {} missed its {} deadline ({})",
            miss.package,
            miss.deadline,
            format_time(miss.delivered_at)
        );
    }
}

fn print_snapshot(time: NaiveTime, snapshots: &[PackageSnapshot]) {
    println!("{}", format!("Status at {}", format_time(time)).bold());
    for s in snapshots {
        let status = match s.status {
            DeliveryStatus::AtHub => s.status.to_string().yellow(),
            DeliveryStatus::EnRoute => s.status.to_string().cyan(),
            DeliveryStatus::Delivered => s.status.to_string().green(),
        };
        let delivered = s
            .delivered_at
            .map(|t| format!(" at {}", format_time(t)))
            .unwrap_or_default();
        let truck = s.truck.map(|t| format!(" truck {}", t)).unwrap_or_default();
        let late = if s.deadline_missed {
            " LATE".red().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:>2}  {:<9}{}{}  {}  (due {}){}",
            s.id, status, delivered, truck, s.address, s.deadline, late
        );
    }
}

fn save_to_csv(registry: &PackageRegistry, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_path(filename)?;

    wtr.write_record([
        "id",
        "truck",
        "departed_at",
        "delivered_at",
        "deadline",
        "address",
    ])?;

    let stamp = |t: Option<NaiveTime>| t.map(format_time).unwrap_or_default();
    for record in registry.all() {
        wtr.write_record([
            record.id().to_string(),
            record.truck.map(|t| t.to_string()).unwrap_or_default(),
            stamp(record.departed_at),
            stamp(record.delivered_at),
            record.deadline().to_string(),
            record.delivery_address().to_string(),
        ])?;
    }

    wtr.flush()?;
    info!("Wrote delivery log to {}", filename);
    Ok(())
}

fn save_summary(report: &DispatchReport, filename: &str) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(&report.summary())?;
    fs::write(filename, json)?;
    info!("Wrote dispatch summary to {}", filename);
    Ok(())
}
