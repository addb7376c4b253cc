use chrono::NaiveTime;
use serde::Serialize;

use crate::domain::types::{PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};

/// One trip out of the hub and back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leg {
    /// Earliest allowed departure until the leg starts, actual departure after.
    pub departure: NaiveTime,
    pub manifest: Vec<PackageId>,
    pub delivered: Vec<PackageId>,
    pub mileage: f64,
    pub returned_at: Option<NaiveTime>,
}

impl Leg {
    pub fn is_done(&self) -> bool {
        self.manifest.is_empty() && self.returned_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Truck {
    pub id: TruckId,
    pub capacity: usize,
    legs: Vec<Leg>,
    mileage: f64,
    clock: NaiveTime,
    position: usize,
}

impl Truck {
    pub fn new(id: TruckId, capacity: usize, hub: usize, day_start: NaiveTime) -> Self {
        Self {
            id,
            capacity,
            legs: vec![],
            mileage: 0.0,
            clock: day_start,
            position: hub,
        }
    }

    /// Append a leg. Legs are loaded once, in order, before any driving.
    pub fn load_leg(&mut self, departure: NaiveTime, mut ids: Vec<PackageId>) -> DispatchResult<()> {
        if ids.len() > self.capacity {
            return Err(DispatchError::CapacityExceeded {
                ids,
                capacity: self.capacity,
            });
        }
        ids.sort_unstable();
        self.legs.push(Leg {
            departure,
            manifest: ids,
            delivered: vec![],
            mileage: 0.0,
            returned_at: None,
        });
        Ok(())
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn leg(&self, leg: usize) -> Option<&Leg> {
        self.legs.get(leg)
    }

    /// Packages still waiting to be delivered, across all legs.
    pub fn manifest(&self) -> Vec<PackageId> {
        self.legs.iter().flat_map(|l| l.manifest.iter().copied()).collect()
    }

    /// Delivered packages in delivery order.
    pub fn delivered(&self) -> Vec<PackageId> {
        self.legs.iter().flat_map(|l| l.delivered.iter().copied()).collect()
    }

    pub fn mileage(&self) -> f64 {
        self.mileage
    }

    pub fn clock(&self) -> NaiveTime {
        self.clock
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn departure_time(&self) -> Option<NaiveTime> {
        self.legs.first().map(|l| l.departure)
    }

    pub fn package_count(&self) -> usize {
        self.legs
            .iter()
            .map(|l| l.manifest.len() + l.delivered.len())
            .sum()
    }

    /// Nothing left to deliver and every leg has come home.
    pub fn is_frozen(&self) -> bool {
        self.legs.iter().all(Leg::is_done)
    }

    pub(crate) fn depart(&mut self, leg: usize, at: NaiveTime) {
        self.clock = at;
        if let Some(l) = self.legs.get_mut(leg) {
            l.departure = at;
        }
    }

    pub(crate) fn deliver(
        &mut self,
        leg: usize,
        package: PackageId,
        location: usize,
        distance: f64,
        at: NaiveTime,
    ) -> DispatchResult<()> {
        let truck = self.id;
        let l = self
            .legs
            .get_mut(leg)
            .ok_or(DispatchError::UnknownTruck(truck))?;
        let pos = l
            .manifest
            .iter()
            .position(|&id| id == package)
            .ok_or(DispatchError::UnknownPackage(package))?;
        l.manifest.remove(pos);
        l.delivered.push(package);
        l.mileage += distance;
        self.mileage += distance;
        self.position = location;
        self.clock = at;
        Ok(())
    }

    /// Drive back to the hub. `counted` is false for an uncounted final return.
    pub(crate) fn return_to_hub(
        &mut self,
        leg: usize,
        hub: usize,
        distance: f64,
        at: NaiveTime,
        counted: bool,
    ) {
        if counted {
            self.mileage += distance;
        }
        if let Some(l) = self.legs.get_mut(leg) {
            if counted {
                l.mileage += distance;
            }
            l.returned_at = Some(at);
        }
        self.position = hub;
        self.clock = at;
    }
}
