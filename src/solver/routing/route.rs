use std::collections::BTreeSet;

use chrono::NaiveTime;
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::DispatchConfig;
use crate::distance::matrix::DistanceTable;
use crate::domain::registry::PackageRegistry;
use crate::domain::truck::Truck;
use crate::domain::types::{PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};
use crate::solver::routing::selection::{select_next, Candidate, Pick, SelectionContext};
use crate::utils::{advance, format_time, travel_time};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStop {
    pub package: PackageId,
    pub location: usize,
    pub distance: f64,
    pub arrive_at: NaiveTime,
    pub pick: Pick,
}

/// Visiting order and timings for one leg, computed without touching any state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub truck: TruckId,
    pub leg: usize,
    pub departure: NaiveTime,
    pub stops: Vec<PlannedStop>,
    pub return_distance: f64,
    pub return_at: NaiveTime,
    /// Whether the drive back to the hub counts towards mileage.
    pub return_counted: bool,
}

impl RoutePlan {
    pub fn order(&self) -> Vec<PackageId> {
        self.stops.iter().map(|s| s.package).collect()
    }

    pub fn mileage(&self) -> f64 {
        let driven: f64 = self.stops.iter().map(|s| s.distance).sum();
        if self.return_counted {
            driven + self.return_distance
        } else {
            driven
        }
    }
}

/// Deadline-aware nearest-neighbour router over a shared distance table.
#[derive(Debug, Clone)]
pub struct Router<'a> {
    table: &'a DistanceTable,
    hub: usize,
    speed: f64,
    include_return: bool,
}

impl<'a> Router<'a> {
    pub fn new(table: &'a DistanceTable, config: &DispatchConfig) -> DispatchResult<Self> {
        Ok(Self {
            table,
            hub: table.index_of(&config.hub_address)?,
            speed: config.average_speed_mph,
            include_return: config.include_return_to_hub,
        })
    }

    pub fn hub(&self) -> usize {
        self.hub
    }

    /// Resolve packages to routing candidates at their final delivery address.
    pub fn candidates(
        &self,
        registry: &PackageRegistry,
        ids: &BTreeSet<PackageId>,
    ) -> DispatchResult<Vec<Candidate>> {
        ids.iter()
            .map(|&id| {
                let record = registry.get(id)?;
                Ok(Candidate {
                    package: id,
                    location: self.table.index_of(&record.delivery_address().street)?,
                    deadline: record.deadline(),
                })
            })
            .collect()
    }

    /// Order a leg starting from the hub at `departure`.
    pub fn plan(
        &self,
        truck: TruckId,
        leg: usize,
        departure: NaiveTime,
        mut pending: Vec<Candidate>,
        final_leg: bool,
    ) -> RoutePlan {
        let mut position = self.hub;
        let mut now = departure;
        let mut stops = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let ctx = SelectionContext {
                table: self.table,
                position,
                now,
                speed: self.speed,
            };
            let Some(choice) = select_next(&ctx, &pending) else {
                break;
            };
            let next = pending.swap_remove(choice.index);
            let distance = self.table.distance(position, next.location);
            now = advance(now, travel_time(distance, self.speed));
            position = next.location;

            if choice.pick != Pick::Nearest {
                debug!(
                    "Truck {} leg {}: package {} picked as {:?} (due {})",
                    truck, leg, next.package, choice.pick, next.deadline
                );
            }
            if !next.deadline.is_met_by(now) {
                warn!(
                    "Truck {} will deliver package {} at {}, after its {} deadline",
                    truck,
                    next.package,
                    format_time(now),
                    next.deadline
                );
            }
            trace!("Truck {} -> package {} at {}", truck, next.package, format_time(now));

            stops.push(PlannedStop {
                package: next.package,
                location: next.location,
                distance,
                arrive_at: now,
                pick: choice.pick,
            });
        }

        let return_distance = self.table.distance(position, self.hub);
        let return_at = advance(now, travel_time(return_distance, self.speed));

        RoutePlan {
            truck,
            leg,
            departure,
            stops,
            return_distance,
            return_at,
            return_counted: self.include_return || !final_leg,
        }
    }

    /// Drive the plan: load the leg, stamp every delivery, bring the truck home.
    pub fn replay(
        &self,
        plan: &RoutePlan,
        truck: &mut Truck,
        registry: &mut PackageRegistry,
    ) -> DispatchResult<()> {
        if truck.id != plan.truck {
            return Err(DispatchError::UnknownTruck(plan.truck));
        }
        let manifest = truck
            .leg(plan.leg)
            .ok_or(DispatchError::UnknownTruck(plan.truck))?
            .manifest
            .clone();

        truck.depart(plan.leg, plan.departure);
        for &id in &manifest {
            registry.mark_en_route(id, truck.id, plan.departure)?;
        }

        for stop in &plan.stops {
            truck.deliver(plan.leg, stop.package, stop.location, stop.distance, stop.arrive_at)?;
            registry.mark_delivered(stop.package, stop.arrive_at)?;
        }

        truck.return_to_hub(
            plan.leg,
            self.hub,
            plan.return_distance,
            plan.return_at,
            plan.return_counted,
        );
        debug!(
            "Truck {} leg {} done: [{}], {:.1} miles, back at {}",
            truck.id,
            plan.leg,
            plan.order().iter().join(", "),
            plan.mileage(),
            format_time(plan.return_at)
        );
        Ok(())
    }
}
