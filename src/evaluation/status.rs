use chrono::NaiveTime;
use serde::Serialize;

use crate::domain::registry::{PackageRecord, PackageRegistry};
use crate::domain::types::{Address, Deadline, DeliveryStatus, PackageId, TruckId};
use crate::error::DispatchResult;

/// Status of a record at `time`, read from its departure and delivery stamps.
/// A package counts as delivered from its delivery second onwards.
pub fn status_at(record: &PackageRecord, time: NaiveTime) -> DeliveryStatus {
    match (record.departed_at, record.delivered_at) {
        (None, _) => DeliveryStatus::AtHub,
        (Some(departed), _) if time < departed => DeliveryStatus::AtHub,
        (_, Some(delivered)) if time >= delivered => DeliveryStatus::Delivered,
        _ => DeliveryStatus::EnRoute,
    }
}

/// What the front desk would see for one package at a given time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSnapshot {
    pub id: PackageId,
    pub status: DeliveryStatus,
    pub address: Address,
    pub deadline: Deadline,
    pub truck: Option<TruckId>,
    pub delivered_at: Option<NaiveTime>,
    /// The deadline has passed at query time without an on-time delivery.
    pub deadline_missed: bool,
}

/// Read-only time-travel queries over a finished dispatch.
#[derive(Debug, Clone, Copy)]
pub struct StatusResolver<'a> {
    registry: &'a PackageRegistry,
}

impl<'a> StatusResolver<'a> {
    pub fn new(registry: &'a PackageRegistry) -> Self {
        Self { registry }
    }

    pub fn status_at(&self, id: PackageId, time: NaiveTime) -> DispatchResult<PackageSnapshot> {
        Ok(snapshot(self.registry.get(id)?, time))
    }

    /// Every package at `time`, in ascending id order.
    pub fn snapshot_all(&self, time: NaiveTime) -> Vec<PackageSnapshot> {
        self.registry
            .all()
            .into_iter()
            .map(|record| snapshot(record, time))
            .collect()
    }
}

fn snapshot(record: &PackageRecord, time: NaiveTime) -> PackageSnapshot {
    let status = status_at(record, time);
    PackageSnapshot {
        id: record.id(),
        status,
        address: record.address_at(time).clone(),
        deadline: record.deadline(),
        truck: match status {
            DeliveryStatus::AtHub => None,
            _ => record.truck,
        },
        delivered_at: match status {
            DeliveryStatus::Delivered => record.delivered_at,
            _ => None,
        },
        deadline_missed: missed_by(record, status, time),
    }
}

fn missed_by(record: &PackageRecord, status: DeliveryStatus, time: NaiveTime) -> bool {
    match (record.deadline(), status) {
        (Deadline::EndOfDay, _) => false,
        (_, DeliveryStatus::Delivered) => record.missed_deadline(),
        (Deadline::At(due), _) => time > due,
    }
}
