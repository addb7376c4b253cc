use std::collections::HashMap;

use chrono::NaiveTime;
use tracing::{debug, info};

use crate::domain::types::{Address, Deadline, DeliveryStatus, Package, PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone, PartialEq)]
pub struct AddressCorrection {
    pub effective: NaiveTime,
    pub address: Address,
}

/// A package plus everything the simulation learns about it.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub package: Package,
    pub status: DeliveryStatus,
    pub truck: Option<TruckId>,
    pub departed_at: Option<NaiveTime>,
    pub delivered_at: Option<NaiveTime>,
    /// Kept sorted by effective time; never rewritten.
    corrections: Vec<AddressCorrection>,
}

impl PackageRecord {
    fn new(package: Package) -> Self {
        Self {
            package,
            status: DeliveryStatus::AtHub,
            truck: None,
            departed_at: None,
            delivered_at: None,
            corrections: vec![],
        }
    }

    pub fn id(&self) -> PackageId {
        self.package.id
    }

    pub fn deadline(&self) -> Deadline {
        self.package.deadline
    }

    /// Delivered, but after the deadline.
    pub fn missed_deadline(&self) -> bool {
        self.delivered_at
            .is_some_and(|at| !self.package.deadline.is_met_by(at))
    }

    /// Address known at `time`: the latest correction already in effect,
    /// otherwise the address the package arrived with.
    pub fn address_at(&self, time: NaiveTime) -> &Address {
        self.corrections
            .iter()
            .rev()
            .find(|c| c.effective <= time)
            .map(|c| &c.address)
            .unwrap_or(&self.package.address)
    }

    /// Address the package must finally be driven to.
    pub fn delivery_address(&self) -> &Address {
        self.corrections
            .last()
            .map(|c| &c.address)
            .unwrap_or(&self.package.address)
    }

    pub fn corrections(&self) -> &[AddressCorrection] {
        &self.corrections
    }

    /// Original address followed by every corrected one.
    pub fn known_addresses(&self) -> impl Iterator<Item = &Address> {
        std::iter::once(&self.package.address).chain(self.corrections.iter().map(|c| &c.address))
    }
}

/// Hash-indexed package store shared by the planner, router and status queries.
#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    records: HashMap<PackageId, PackageRecord>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packages(packages: impl IntoIterator<Item = Package>) -> DispatchResult<Self> {
        let mut registry = Self::new();
        for package in packages {
            registry.insert(package)?;
        }
        info!("Registered {} packages", registry.len());
        Ok(registry)
    }

    pub fn insert(&mut self, package: Package) -> DispatchResult<()> {
        let id = package.id;
        if self.records.contains_key(&id) {
            return Err(DispatchError::DuplicatePackage(id));
        }
        self.records.insert(id, PackageRecord::new(package));
        Ok(())
    }

    pub fn lookup(&self, id: PackageId) -> Option<&PackageRecord> {
        self.records.get(&id)
    }

    pub fn get(&self, id: PackageId) -> DispatchResult<&PackageRecord> {
        self.lookup(id).ok_or(DispatchError::UnknownPackage(id))
    }

    fn get_mut(&mut self, id: PackageId) -> DispatchResult<&mut PackageRecord> {
        self.records
            .get_mut(&id)
            .ok_or(DispatchError::UnknownPackage(id))
    }

    /// Every record, in ascending id order.
    pub fn all(&self) -> Vec<&PackageRecord> {
        let mut records: Vec<&PackageRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.id());
        records
    }

    pub fn ids(&self) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self.records.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mark_en_route(
        &mut self,
        id: PackageId,
        truck: TruckId,
        departed_at: NaiveTime,
    ) -> DispatchResult<()> {
        let record = self.get_mut(id)?;
        if record.status != DeliveryStatus::AtHub {
            return Err(DispatchError::InvalidTransition {
                id,
                from: record.status,
                to: DeliveryStatus::EnRoute,
            });
        }
        record.status = DeliveryStatus::EnRoute;
        record.truck = Some(truck);
        record.departed_at = Some(departed_at);
        Ok(())
    }

    pub fn mark_delivered(&mut self, id: PackageId, delivered_at: NaiveTime) -> DispatchResult<()> {
        let record = self.get_mut(id)?;
        if record.status != DeliveryStatus::EnRoute {
            return Err(DispatchError::InvalidTransition {
                id,
                from: record.status,
                to: DeliveryStatus::Delivered,
            });
        }
        record.status = DeliveryStatus::Delivered;
        record.delivered_at = Some(delivered_at);
        Ok(())
    }

    /// Log a corrected address that becomes known at `effective`. Queries for
    /// earlier times keep reporting the address in effect back then.
    pub fn correct_address(
        &mut self,
        id: PackageId,
        address: Address,
        effective: NaiveTime,
    ) -> DispatchResult<()> {
        let record = self.get_mut(id)?;
        let at = record
            .corrections
            .partition_point(|c| c.effective <= effective);
        debug!("Package {} address corrected to '{}' at {}", id, address, effective);
        record
            .corrections
            .insert(at, AddressCorrection { effective, address });
        Ok(())
    }

    pub fn address_at(&self, id: PackageId, time: NaiveTime) -> DispatchResult<&Address> {
        Ok(self.get(id)?.address_at(time))
    }

    pub fn delivery_address(&self, id: PackageId) -> DispatchResult<&Address> {
        Ok(self.get(id)?.delivery_address())
    }
}
