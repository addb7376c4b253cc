use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveTime;
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, span, Level};

use crate::config::DispatchConfig;
use crate::domain::registry::PackageRegistry;
use crate::domain::types::{Deadline, PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};
use crate::solver::loading::groups::{build_units, LoadUnit};
use crate::utils::format_time;

/// Packages for one trip of one truck. Order is decided later by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegPlan {
    pub truck: TruckId,
    pub leg: usize,
    /// Exact departure for a first leg; for later legs the truck leaves at
    /// the later of this and its return to the hub.
    pub departure: NaiveTime,
    pub packages: BTreeSet<PackageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadingPlan {
    legs: Vec<LegPlan>,
}

impl LoadingPlan {
    /// Legs ordered by truck, then leg number.
    pub fn legs(&self) -> &[LegPlan] {
        &self.legs
    }

    pub fn legs_for(&self, truck: TruckId) -> impl Iterator<Item = &LegPlan> {
        self.legs.iter().filter(move |l| l.truck == truck)
    }

    pub fn truck_of(&self, id: PackageId) -> Option<TruckId> {
        self.legs
            .iter()
            .find(|l| l.packages.contains(&id))
            .map(|l| l.truck)
    }

    /// Truck id to every package it carries over the day.
    pub fn assignments(&self) -> BTreeMap<TruckId, BTreeSet<PackageId>> {
        let mut map: BTreeMap<TruckId, BTreeSet<PackageId>> = BTreeMap::new();
        for leg in &self.legs {
            map.entry(leg.truck)
                .or_default()
                .extend(leg.packages.iter().copied());
        }
        map
    }

    pub fn package_count(&self) -> usize {
        self.legs.iter().map(|l| l.packages.len()).sum()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    truck: TruckId,
    leg: usize,
    departure: NaiveTime,
    delayed: bool,
    packages: Vec<PackageId>,
    streets: Vec<String>,
}

impl Slot {
    fn take(&mut self, unit: &LoadUnit) {
        self.packages.extend(unit.ids.iter().copied());
        for street in &unit.streets {
            if !self.streets.contains(street) {
                self.streets.push(street.clone());
            }
        }
    }
}

struct Planner {
    truck_count: usize,
    capacity: usize,
    max_legs: usize,
    baseline: NaiveTime,
    slots: Vec<Slot>,
    /// Deadlines of pinned units still waiting to be placed, by truck.
    pinned_deadlines: Vec<(TruckId, Deadline)>,
}

impl Planner {
    fn new(config: &DispatchConfig) -> Self {
        let slots = (1..=config.truck_count)
            .map(|truck| Slot {
                truck,
                leg: 0,
                departure: config.day_start,
                delayed: false,
                packages: vec![],
                streets: vec![],
            })
            .collect();
        Self {
            truck_count: config.truck_count,
            capacity: config.truck_capacity,
            max_legs: config.max_legs_per_truck,
            baseline: config.day_start,
            slots,
            pinned_deadlines: vec![],
        }
    }

    /// A truck is spoken for at `hold` when a pinned unit riding it is due
    /// before the hold ends.
    fn needed_before(&self, truck: TruckId, hold: NaiveTime) -> bool {
        self.pinned_deadlines
            .iter()
            .any(|&(pin, deadline)| pin == truck && deadline < Deadline::At(hold))
    }

    fn accepts(&self, slot: &Slot, unit: &LoadUnit) -> bool {
        slot.packages.len() + unit.len() <= self.capacity
            && unit.pin.map_or(true, |pin| pin == slot.truck)
    }

    fn candidates<'a>(&'a self, unit: &'a LoadUnit) -> impl Iterator<Item = (usize, &'a Slot)> + 'a {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| self.accepts(s, unit))
    }

    fn legs_of(&self, truck: TruckId) -> usize {
        self.slots.iter().filter(|s| s.truck == truck).count()
    }

    /// Open another trip on the truck whose latest trip leaves earliest.
    fn open_leg(&mut self, unit: &LoadUnit, floor: NaiveTime) -> Option<usize> {
        let truck = (1..=self.truck_count)
            .filter(|&t| unit.pin.map_or(true, |pin| pin == t))
            .filter(|&t| self.legs_of(t) < self.max_legs)
            .min_by_key(|&t| {
                let last = self
                    .slots
                    .iter()
                    .filter(|s| s.truck == t)
                    .map(|s| s.departure)
                    .max();
                (last, t)
            })?;
        let leg = self.legs_of(truck);
        debug!(
            "Opening leg {} of truck {} (departs no earlier than {})",
            leg,
            truck,
            format_time(floor)
        );
        self.slots.push(Slot {
            truck,
            leg,
            departure: floor,
            delayed: false,
            packages: vec![],
            streets: vec![],
        });
        Some(self.slots.len() - 1)
    }

    fn delayed_trucks(&self) -> usize {
        self.slots.iter().filter(|s| s.delayed).count()
    }

    fn place(&mut self, slot: usize, unit: &LoadUnit) {
        let s = &mut self.slots[slot];
        debug!(
            "Packages [{}] -> truck {} leg {}",
            unit.ids.iter().join(", "),
            s.truck,
            s.leg
        );
        s.take(unit);
    }

    /// Held units go where they wait least: a leg already leaving late
    /// enough, an empty first leg pushed back to the hold, or a later trip.
    /// A truck whose pinned packages are due before the hold is never pushed
    /// back.
    fn place_held(&mut self, unit: &LoadUnit, hold: NaiveTime) -> DispatchResult<()> {
        let waiting = self
            .candidates(unit)
            .filter(|(_, s)| s.departure >= hold)
            .min_by_key(|(_, s)| (s.departure, s.leg, s.packages.len(), s.truck))
            .map(|(i, _)| i);
        if let Some(i) = waiting {
            self.place(i, unit);
            return Ok(());
        }

        // at least one truck always leaves on time
        if self.delayed_trucks() + 1 < self.truck_count {
            let idle = self
                .candidates(unit)
                .filter(|(_, s)| s.leg == 0 && !s.delayed && s.packages.is_empty())
                .filter(|(_, s)| !self.needed_before(s.truck, hold))
                .max_by_key(|(_, s)| s.truck)
                .map(|(i, _)| i);
            if let Some(i) = idle {
                let slot = &mut self.slots[i];
                slot.departure = hold;
                slot.delayed = true;
                info!("Truck {} held at hub until {}", slot.truck, format_time(hold));
                self.place(i, unit);
                return Ok(());
            }
        }

        match self.open_leg(unit, hold.max(self.baseline)) {
            Some(i) => {
                self.place(i, unit);
                Ok(())
            }
            None => Err(DispatchError::Unschedulable {
                ids: unit.ids.clone(),
                hold,
            }),
        }
    }

    fn place_pinned(&mut self, unit: &LoadUnit) -> DispatchResult<()> {
        let found = self
            .candidates(unit)
            .min_by_key(|(_, s)| (s.leg, s.departure))
            .map(|(i, _)| i);
        let slot = found.or_else(|| self.open_leg(unit, self.baseline));
        self.place_or_fail(slot, unit)
    }

    /// Deadline units ride the earliest-departing first trip with room.
    fn place_deadline(&mut self, unit: &LoadUnit) -> DispatchResult<()> {
        let found = self
            .candidates(unit)
            .min_by_key(|(_, s)| (s.leg, s.departure, s.packages.len(), s.truck))
            .map(|(i, _)| i);
        let slot = found.or_else(|| self.open_leg(unit, self.baseline));
        self.place_or_fail(slot, unit)
    }

    /// Remaining units join a leg already stopping at their address,
    /// otherwise the least loaded one.
    fn place_remaining(&mut self, unit: &LoadUnit) -> DispatchResult<()> {
        let shared = self
            .candidates(unit)
            .filter(|(_, s)| unit.streets.iter().any(|st| s.streets.contains(st)))
            .min_by_key(|(_, s)| (s.leg, s.departure, s.truck))
            .map(|(i, _)| i);
        let lightest = self
            .candidates(unit)
            .min_by_key(|(_, s)| (s.leg, s.packages.len(), s.departure, s.truck))
            .map(|(i, _)| i);
        let slot = shared
            .or(lightest)
            .or_else(|| self.open_leg(unit, self.baseline));
        self.place_or_fail(slot, unit)
    }

    fn place_or_fail(&mut self, slot: Option<usize>, unit: &LoadUnit) -> DispatchResult<()> {
        match slot {
            Some(i) => {
                self.place(i, unit);
                Ok(())
            }
            None => Err(DispatchError::CapacityExceeded {
                ids: unit.ids.clone(),
                capacity: self.capacity,
            }),
        }
    }

    fn finish(self) -> LoadingPlan {
        let mut legs = vec![];
        for truck in 1..=self.truck_count {
            let trips = self
                .slots
                .iter()
                .filter(|s| s.truck == truck && !s.packages.is_empty())
                .sorted_by_key(|s| s.leg);
            for (leg, slot) in trips.enumerate() {
                legs.push(LegPlan {
                    truck,
                    leg,
                    departure: slot.departure,
                    packages: slot.packages.iter().copied().collect(),
                });
            }
        }
        LoadingPlan { legs }
    }
}

/// Assign every registered package to a truck leg, honouring groups, pins,
/// holds and capacity. The result depends only on the registry contents.
pub fn build_loading_plan(
    registry: &PackageRegistry,
    config: &DispatchConfig,
) -> DispatchResult<LoadingPlan> {
    let span = span!(Level::INFO, "loading_plan", packages = registry.len());
    let _guard = span.enter();

    config.validate()?;
    let units = build_units(registry, config.truck_count, config.truck_capacity)?;
    let mut planner = Planner::new(config);

    let (held, free): (Vec<&LoadUnit>, Vec<&LoadUnit>) =
        units.iter().partition(|u| u.hold.is_some());
    let (pinned, free): (Vec<&LoadUnit>, Vec<&LoadUnit>) =
        free.into_iter().partition(|u| u.pin.is_some());
    let (timed, rest): (Vec<&LoadUnit>, Vec<&LoadUnit>) = free
        .into_iter()
        .partition(|u| matches!(u.deadline, Deadline::At(_)));
    planner.pinned_deadlines = pinned
        .iter()
        .filter_map(|u| u.pin.map(|pin| (pin, u.deadline)))
        .collect();

    for unit in held
        .into_iter()
        .sorted_by_key(|u| (u.hold, u.deadline, u.min_id()))
    {
        if let Some(hold) = unit.hold {
            planner.place_held(unit, hold)?;
        }
    }
    for unit in pinned
        .into_iter()
        .sorted_by_key(|u| (u.deadline, u.min_id()))
    {
        planner.place_pinned(unit)?;
    }
    for unit in timed
        .into_iter()
        .sorted_by_key(|u| (u.deadline, u.min_id()))
    {
        planner.place_deadline(unit)?;
    }
    for unit in rest.into_iter().sorted_by_key(|u| u.min_id()) {
        planner.place_remaining(unit)?;
    }

    let plan = planner.finish();
    for leg in plan.legs() {
        info!(
            "Truck {} leg {} departs {} with {} packages: [{}]",
            leg.truck,
            leg.leg,
            format_time(leg.departure),
            leg.packages.len(),
            leg.packages.iter().join(", ")
        );
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Address, Constraint, Package};
    use crate::utils::time_of_day;

    fn pkg(id: PackageId, street: &str) -> Package {
        Package::new(
            id,
            Address::new(street, "Salt Lake City", "84115"),
            Deadline::EndOfDay,
            1,
        )
    }

    fn timed(id: PackageId, street: &str, h: u32, m: u32) -> Package {
        let mut p = pkg(id, street);
        p.deadline = Deadline::At(time_of_day(h, m));
        p
    }

    fn config(trucks: usize, capacity: usize) -> DispatchConfig {
        DispatchConfig {
            truck_count: trucks,
            truck_capacity: capacity,
            ..DispatchConfig::default()
        }
    }

    fn plan(packages: Vec<Package>, config: &DispatchConfig) -> DispatchResult<LoadingPlan> {
        let reg = PackageRegistry::from_packages(packages).unwrap();
        build_loading_plan(&reg, config)
    }

    #[test]
    fn every_package_is_planned_once() {
        let packages: Vec<Package> = (1..=20)
            .map(|id| pkg(id, &format!("{id} Elm St")))
            .collect();
        let p = plan(packages, &config(3, 8)).unwrap();
        assert_eq!(p.package_count(), 20);
        let all: BTreeSet<PackageId> = p.assignments().values().flatten().copied().collect();
        assert_eq!(all.len(), 20);
        assert!(p.legs().iter().all(|l| l.packages.len() <= 8));
    }

    #[test]
    fn pins_are_respected() {
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::TruckOnly(2)),
            pkg(2, "B").with_constraint(Constraint::TruckOnly(2)),
            pkg(3, "C"),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();
        assert_eq!(p.truck_of(1), Some(2));
        assert_eq!(p.truck_of(2), Some(2));
    }

    #[test]
    fn held_packages_delay_one_truck_and_others_leave_at_start() {
        let nine_oh_five = time_of_day(9, 5);
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::DelayedUntil(nine_oh_five)),
            pkg(2, "B").with_constraint(Constraint::DelayedUntil(nine_oh_five)),
            timed(3, "C", 9, 0),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();

        assert_eq!(p.truck_of(1), Some(3));
        assert_eq!(p.truck_of(2), Some(3));
        let late = p.legs_for(3).next().unwrap();
        assert_eq!(late.departure, nine_oh_five);

        let early = p.legs().iter().find(|l| l.packages.contains(&3)).unwrap();
        assert_eq!(early.departure, time_of_day(8, 0));
    }

    #[test]
    fn late_hold_with_no_idle_truck_uses_a_second_trip() {
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5))),
            pkg(2, "B").with_constraint(Constraint::WrongAddressUntil(time_of_day(10, 20))),
        ];
        let p = plan(packages, &config(2, 16)).unwrap();

        // only truck 2 may be held back, so package 2 waits for a later trip on truck 1
        assert_eq!(p.truck_of(1), Some(2));
        let second = p.legs().iter().find(|l| l.packages.contains(&2)).unwrap();
        assert_eq!(second.truck, 1);
        assert_eq!(second.departure, time_of_day(10, 20));
    }

    #[test]
    fn unschedulable_when_no_leg_can_wait() {
        let packages =
            vec![pkg(1, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5)))];
        let single = DispatchConfig {
            max_legs_per_truck: 1,
            ..config(1, 16)
        };
        assert!(matches!(
            plan(packages, &single),
            Err(DispatchError::Unschedulable { .. })
        ));
    }

    #[test]
    fn capacity_exceeded_when_fleet_is_full() {
        let packages: Vec<Package> = (1..=5).map(|id| pkg(id, "A")).collect();
        let tight = DispatchConfig {
            max_legs_per_truck: 1,
            ..config(2, 2)
        };
        match plan(packages, &tight) {
            Err(DispatchError::CapacityExceeded { ids, capacity }) => {
                assert_eq!(ids, vec![5]);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn deadline_packages_take_the_earliest_truck() {
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5))),
            timed(2, "B", 10, 30),
            timed(3, "C", 10, 30),
        ];
        let p = plan(packages, &config(2, 16)).unwrap();
        assert_eq!(p.truck_of(2), Some(1));
        assert_eq!(p.truck_of(3), Some(1));
    }

    #[test]
    fn shared_address_rides_together() {
        let packages = vec![
            timed(1, "410 S State St", 10, 30),
            pkg(2, "Other"),
            pkg(3, "410 S State St"),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();
        assert_eq!(p.truck_of(3), p.truck_of(1));
    }

    #[test]
    fn pinned_deadline_keeps_its_truck_from_being_held() {
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::WrongAddressUntil(time_of_day(10, 20))),
            timed(2, "B", 9, 0).with_constraint(Constraint::TruckOnly(3)),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();

        let pinned = p.legs_for(3).next().unwrap();
        assert_eq!(pinned.departure, time_of_day(8, 0));
        assert!(pinned.packages.contains(&2));

        let held = p.legs().iter().find(|l| l.packages.contains(&1)).unwrap();
        assert_eq!(held.truck, 2);
        assert_eq!(held.departure, time_of_day(10, 20));
    }

    #[test]
    fn end_of_day_pin_does_not_reserve_its_truck() {
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5))),
            pkg(2, "B").with_constraint(Constraint::TruckOnly(3)),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();
        assert_eq!(p.truck_of(1), Some(3));
        assert_eq!(p.truck_of(2), Some(3));
        assert!(p.legs_for(3).all(|l| l.departure == time_of_day(9, 5)));
    }

    #[test]
    fn every_truck_pinned_early_sends_the_hold_on_a_later_trip() {
        // both trucks carry a 9:00 pin, so neither may wait for 9:05
        let packages = vec![
            pkg(1, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5))),
            timed(2, "B", 9, 0).with_constraint(Constraint::TruckOnly(2)),
            timed(3, "C", 9, 0).with_constraint(Constraint::TruckOnly(1)),
        ];
        let p = plan(packages, &config(2, 16)).unwrap();

        for id in [2, 3] {
            let early = p.legs().iter().find(|l| l.packages.contains(&id)).unwrap();
            assert_eq!((early.leg, early.departure), (0, time_of_day(8, 0)));
        }
        let held = p.legs().iter().find(|l| l.packages.contains(&1)).unwrap();
        assert_eq!((held.truck, held.leg), (1, 1));
        assert_eq!(held.departure, time_of_day(9, 5));
    }

    #[test]
    fn group_inherits_pin_and_hold() {
        let nine_oh_five = time_of_day(9, 5);
        let packages = vec![
            pkg(1, "A")
                .with_constraint(Constraint::TruckOnly(2))
                .with_constraint(Constraint::GroupedWith(vec![2])),
            pkg(2, "B").with_constraint(Constraint::DelayedUntil(nine_oh_five)),
            pkg(3, "C"),
        ];
        let p = plan(packages, &config(3, 16)).unwrap();

        assert_eq!(p.truck_of(1), Some(2));
        assert_eq!(p.truck_of(2), Some(2));
        let leg = p.legs_for(2).next().unwrap();
        assert_eq!(leg.departure, nine_oh_five);
        assert_eq!(leg.packages, BTreeSet::from([1, 2]));
        assert_eq!(p.truck_of(3), Some(1));
    }

    #[test]
    fn dispatch_carries_group_pin_and_hold_through_delivery() {
        use crate::distance::matrix::DistanceTable;
        use crate::domain::types::DeliveryStatus;
        use crate::solver::dispatch::Dispatcher;

        let names = ["Hub", "A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let table = DistanceTable::from_lower_triangle(
            names,
            &[
                vec![0.0],
                vec![2.0, 0.0],
                vec![4.0, 3.0, 0.0],
                vec![6.0, 5.0, 1.5, 0.0],
            ],
        )
        .unwrap();
        let mut reg = PackageRegistry::from_packages(vec![
            pkg(1, "A")
                .with_constraint(Constraint::TruckOnly(2))
                .with_constraint(Constraint::GroupedWith(vec![2])),
            pkg(2, "B").with_constraint(Constraint::DelayedUntil(time_of_day(9, 5))),
            pkg(3, "C"),
        ])
        .unwrap();
        let config = DispatchConfig {
            hub_address: "Hub".into(),
            ..config(3, 16)
        };
        let report = Dispatcher::new(&table, config).unwrap().run(&mut reg).unwrap();

        for id in [1, 2] {
            let record = reg.lookup(id).unwrap();
            assert_eq!(record.status, DeliveryStatus::Delivered);
            assert_eq!(record.truck, Some(2));
            assert_eq!(record.departed_at, Some(time_of_day(9, 5)));
        }
        assert_eq!(reg.lookup(3).unwrap().departed_at, Some(time_of_day(8, 0)));
        assert_eq!(report.truck(2).unwrap().departure_time(), Some(time_of_day(9, 5)));
        assert!(report.deadline_misses.is_empty());
    }

    #[test]
    fn planning_is_deterministic() {
        let packages: Vec<Package> = (1..=30)
            .map(|id| {
                let p = pkg(id, &format!("{} Oak Ave", id % 7));
                if id % 5 == 0 {
                    p.with_constraint(Constraint::DelayedUntil(time_of_day(9, 5)))
                } else {
                    p
                }
            })
            .collect();
        let first = plan(packages.clone(), &config(3, 16)).unwrap();
        let second = plan(packages, &config(3, 16)).unwrap();
        assert_eq!(first, second);
    }
}
