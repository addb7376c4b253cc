use chrono::NaiveTime;
use itertools::Itertools;
use thiserror::Error;

use crate::domain::types::{DeliveryStatus, PackageId, TruckId};

fn id_list(ids: &[PackageId]) -> String {
    ids.iter().join(", ")
}

/// Errors raised by the dispatch core. Every variant except
/// `InvalidTransition` is detected before any truck is populated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("address '{0}' is not in the distance table")]
    MissingAddress(String),

    #[error("packages [{}] do not fit within truck capacity {capacity}", id_list(.ids))]
    CapacityExceeded { ids: Vec<PackageId>, capacity: usize },

    #[error("conflicting constraints on packages [{}]: {reason}", id_list(.ids))]
    ConstraintConflict { ids: Vec<PackageId>, reason: String },

    #[error("packages [{}] held until {hold} cannot be placed on any truck leg", id_list(.ids))]
    Unschedulable { ids: Vec<PackageId>, hold: NaiveTime },

    #[error("package {0} is not registered")]
    UnknownPackage(PackageId),

    #[error("package {0} is registered twice")]
    DuplicatePackage(PackageId),

    #[error("truck {0} does not exist")]
    UnknownTruck(TruckId),

    #[error("package {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: PackageId,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while reading input files.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid time '{0}'")]
    Time(String),

    #[error("invalid number '{0}'")]
    Number(String),

    #[error("package {id}: cannot parse note '{note}'")]
    Note { id: PackageId, note: String },

    #[error("distance table: {0}")]
    Table(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
