use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use tracing::{debug, info};

use crate::distance::matrix::DistanceTable;
use crate::domain::registry::{AddressCorrection, PackageRegistry};
use crate::domain::types::{Address, Constraint, Deadline, Package, PackageId, TruckId};
use crate::error::{DispatchError, LoadError};
use crate::setup::init_types::{CorrectionRow, PackageRow};
use crate::utils::parse_time_of_day;

/// Street names from an `index,name,street` file, in table order.
pub fn read_addresses<R: Read>(reader: R) -> Result<Vec<String>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut streets = vec![];
    for row in reader.records() {
        let record = row?;
        if let Some(street) = record.iter().rev().find(|f| !f.is_empty()) {
            streets.push(street.to_string());
        }
    }
    Ok(streets)
}

/// Lower-triangle distance rows. A row ends at its first blank cell.
pub fn read_distance_rows<R: Read>(reader: R) -> Result<Vec<Vec<f64>>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = vec![];
    for row in reader.records() {
        let record = row?;
        let cells = record
            .iter()
            .take_while(|cell| !cell.is_empty())
            .map(|cell| {
                cell.parse::<f64>()
                    .map_err(|_| LoadError::Number(cell.to_string()))
            })
            .collect::<Result<Vec<f64>, LoadError>>()?;
        if !cells.is_empty() {
            rows.push(cells);
        }
    }
    Ok(rows)
}

pub fn load_distance_table(
    addresses: impl AsRef<Path>,
    distances: impl AsRef<Path>,
) -> Result<DistanceTable, LoadError> {
    let names = read_addresses(File::open(addresses)?)?;
    let rows = read_distance_rows(File::open(distances)?)?;
    info!("Read {} addresses and {} distance rows", names.len(), rows.len());
    DistanceTable::from_lower_triangle(names, &rows)
}

/// "EOD" (or nothing) means end of day; anything else is a time of day.
pub fn parse_deadline(raw: &str) -> Result<Deadline, LoadError> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("EOD") {
        return Ok(Deadline::EndOfDay);
    }
    parse_time_of_day(raw).map(Deadline::At)
}

/// Turn a package's special-notes cell into constraints. Accepts the
/// `key=value` form (`;`-separated) and the prose used by the depot.
pub fn parse_notes(id: PackageId, raw: &str) -> Result<Vec<Constraint>, LoadError> {
    let mut constraints = vec![];
    for piece in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let parsed = match piece.split_once('=') {
            Some((key, value)) => parse_keyed_note(key.trim(), value.trim()).map(Some),
            None => parse_prose_note(piece),
        };
        match parsed {
            Ok(Some(constraint)) => constraints.push(constraint),
            Ok(None) => {}
            Err(_) => {
                return Err(LoadError::Note {
                    id,
                    note: piece.to_string(),
                })
            }
        }
    }
    Ok(constraints)
}

fn parse_ids(raw: &str) -> Result<Vec<PackageId>, LoadError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| LoadError::Number(s.to_string())))
        .collect()
}

fn parse_truck(raw: &str) -> Result<TruckId, LoadError> {
    raw.trim()
        .parse()
        .map_err(|_| LoadError::Number(raw.to_string()))
}

fn parse_keyed_note(key: &str, value: &str) -> Result<Constraint, LoadError> {
    match key.to_ascii_lowercase().as_str() {
        "grouped-with" => parse_ids(value).map(Constraint::GroupedWith),
        "truck-only" => parse_truck(value).map(Constraint::TruckOnly),
        "delayed-until" => parse_time_of_day(value).map(Constraint::DelayedUntil),
        "wrong-address-until" => parse_time_of_day(value).map(Constraint::WrongAddressUntil),
        _ => Err(LoadError::Time(value.to_string())),
    }
}

/// `Ok(None)` for notes that carry nothing to enforce.
fn parse_prose_note(note: &str) -> Result<Option<Constraint>, LoadError> {
    let lower = note.to_ascii_lowercase();

    if let Some(rest) = lower.strip_prefix("must be delivered with") {
        return parse_ids(rest).map(|ids| Some(Constraint::GroupedWith(ids)));
    }
    if let Some(rest) = lower.strip_prefix("can only be on truck") {
        return parse_truck(rest).map(|truck| Some(Constraint::TruckOnly(truck)));
    }
    if lower.starts_with("delayed") {
        let (_, time) = lower
            .rsplit_once("until")
            .ok_or_else(|| LoadError::Time(note.to_string()))?;
        return parse_time_of_day(time).map(|t| Some(Constraint::DelayedUntil(t)));
    }
    if lower.starts_with("wrong address") {
        // the hold comes from the matching correction row
        return Ok(None);
    }
    Err(LoadError::Time(note.to_string()))
}

fn package_from_row(row: PackageRow) -> Result<Package, LoadError> {
    let mut package = Package::new(
        row.id,
        Address::new(&row.address, &row.city, &row.zip),
        parse_deadline(&row.deadline)?,
        row.weight,
    );
    package.constraints = parse_notes(row.id, &row.notes)?;
    Ok(package)
}

/// Packages from a file with an `id,address,city,zip,deadline,weight,notes` header.
pub fn read_packages<R: Read>(reader: R) -> Result<Vec<Package>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut packages = vec![];
    for row in reader.deserialize::<PackageRow>() {
        let package = package_from_row(row?)?;
        debug!(
            "Package {} -> {} ({} constraints)",
            package.id,
            package.address,
            package.constraints.len()
        );
        packages.push(package);
    }
    Ok(packages)
}

pub fn load_packages(path: impl AsRef<Path>) -> Result<Vec<Package>, LoadError> {
    read_packages(File::open(path)?)
}

/// Corrections from a file with an `id,effective,address,city,zip` header.
pub fn read_corrections<R: Read>(
    reader: R,
) -> Result<Vec<(PackageId, AddressCorrection)>, LoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut corrections = vec![];
    for row in reader.deserialize::<CorrectionRow>() {
        let row = row?;
        corrections.push((
            row.id,
            AddressCorrection {
                effective: parse_time_of_day(&row.effective)?,
                address: Address::new(&row.address, &row.city, &row.zip),
            },
        ));
    }
    Ok(corrections)
}

pub fn load_corrections(
    path: impl AsRef<Path>,
) -> Result<Vec<(PackageId, AddressCorrection)>, LoadError> {
    read_corrections(File::open(path)?)
}

/// Build the registry and log every correction. A corrected package is held
/// at the hub until its correction is known.
pub fn register(
    mut packages: Vec<Package>,
    corrections: Vec<(PackageId, AddressCorrection)>,
) -> Result<PackageRegistry, LoadError> {
    for (id, correction) in &corrections {
        let package = packages
            .iter_mut()
            .find(|p| p.id == *id)
            .ok_or(DispatchError::UnknownPackage(*id))?;
        let held = package
            .constraints
            .iter()
            .any(|c| matches!(c, Constraint::WrongAddressUntil(_)));
        if !held {
            package
                .constraints
                .push(Constraint::WrongAddressUntil(correction.effective));
        }
    }

    let mut registry = PackageRegistry::from_packages(packages)?;
    for (id, correction) in corrections {
        registry.correct_address(id, correction.address, correction.effective)?;
    }
    Ok(registry)
}
