use std::fmt;

use chrono::NaiveTime;
use serde::Serialize;

use crate::utils::format_time;

pub type PackageId = u32;
/// Trucks are numbered from 1, matching "Can only be on truck 2" notes.
pub type TruckId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub zip: String,
}

impl Address {
    pub fn new(street: &str, city: &str, zip: &str) -> Self {
        Self {
            street: street.trim().to_string(),
            city: city.trim().to_string(),
            zip: zip.trim().to_string(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} {}", self.street, self.city, self.zip)
    }
}

// `At` sorts before `EndOfDay`, so the derived order is "most urgent first".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Deadline {
    At(NaiveTime),
    EndOfDay,
}

impl Deadline {
    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            Deadline::At(t) => Some(*t),
            Deadline::EndOfDay => None,
        }
    }

    pub fn is_met_by(&self, delivered_at: NaiveTime) -> bool {
        match self {
            Deadline::At(t) => delivered_at <= *t,
            Deadline::EndOfDay => true,
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::At(t) => write!(f, "{}", format_time(*t)),
            Deadline::EndOfDay => write!(f, "EOD"),
        }
    }
}

/// Special handling attached to a package, parsed once from its notes.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    GroupedWith(Vec<PackageId>),
    TruckOnly(TruckId),
    DelayedUntil(NaiveTime),
    /// The listed address is wrong; the correct one is known from this time on.
    WrongAddressUntil(NaiveTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeliveryStatus {
    AtHub,
    EnRoute,
    Delivered,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeliveryStatus::AtHub => "AT_HUB",
            DeliveryStatus::EnRoute => "EN_ROUTE",
            DeliveryStatus::Delivered => "DELIVERED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub id: PackageId,
    pub address: Address,
    pub deadline: Deadline,
    pub weight: u32,
    pub constraints: Vec<Constraint>,
}

impl Package {
    pub fn new(id: PackageId, address: Address, deadline: Deadline, weight: u32) -> Self {
        Self {
            id,
            address,
            deadline,
            weight,
            constraints: vec![],
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn grouped_with(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::GroupedWith(ids) => Some(ids),
                _ => None,
            })
            .flatten()
            .copied()
    }

    pub fn truck_pins(&self) -> impl Iterator<Item = TruckId> + '_ {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::TruckOnly(truck) => Some(*truck),
            _ => None,
        })
    }

    /// Earliest time the package may leave the hub: the latest of its
    /// delayed-arrival and wrong-address times.
    pub fn hold_until(&self) -> Option<NaiveTime> {
        self.constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::DelayedUntil(t) | Constraint::WrongAddressUntil(t) => Some(*t),
                _ => None,
            })
            .max()
    }
}
