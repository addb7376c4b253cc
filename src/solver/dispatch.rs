use chrono::NaiveTime;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, span, warn, Level};

use crate::config::DispatchConfig;
use crate::distance::matrix::DistanceTable;
use crate::domain::registry::PackageRegistry;
use crate::domain::truck::Truck;
use crate::domain::types::{DeliveryStatus, PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};
use crate::evaluation::mileage::{deadline_misses, total_mileage, within_budget, DeadlineMiss};
use crate::solver::loading::plan::{build_loading_plan, LegPlan, LoadingPlan};
use crate::solver::routing::route::{RoutePlan, Router};
use crate::solver::routing::selection::Candidate;
use crate::utils::format_time;

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub plan: LoadingPlan,
    pub trucks: Vec<Truck>,
    pub routes: Vec<RoutePlan>,
    pub deadline_misses: Vec<DeadlineMiss>,
    pub total_mileage: f64,
    pub mileage_budget: f64,
}

impl DispatchReport {
    pub fn within_mileage_budget(&self) -> bool {
        within_budget(self.total_mileage, self.mileage_budget)
    }

    pub fn truck(&self, id: TruckId) -> Option<&Truck> {
        self.trucks.iter().find(|t| t.id == id)
    }

    pub fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            total_mileage: self.total_mileage,
            mileage_budget: self.mileage_budget,
            within_budget: self.within_mileage_budget(),
            trucks: self
                .trucks
                .iter()
                .map(|t| TruckSummary {
                    id: t.id,
                    mileage: t.mileage(),
                    departures: t.legs().iter().map(|l| l.departure).collect(),
                    delivered: t.delivered(),
                    returned_at: t.legs().last().and_then(|l| l.returned_at),
                })
                .collect(),
            deadline_misses: self.deadline_misses.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TruckSummary {
    pub id: TruckId,
    pub mileage: f64,
    pub departures: Vec<NaiveTime>,
    pub delivered: Vec<PackageId>,
    pub returned_at: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub total_mileage: f64,
    pub mileage_budget: f64,
    pub within_budget: bool,
    pub trucks: Vec<TruckSummary>,
    pub deadline_misses: Vec<DeadlineMiss>,
}

struct LegJob<'p> {
    leg: &'p LegPlan,
    candidates: Vec<Candidate>,
    final_leg: bool,
}

/// Validate, plan, route and replay a day of deliveries.
#[derive(Debug, Clone)]
pub struct Dispatcher<'a> {
    table: &'a DistanceTable,
    config: DispatchConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(table: &'a DistanceTable, config: DispatchConfig) -> DispatchResult<Self> {
        config.validate()?;
        table.index_of(&config.hub_address)?;
        Ok(Self { table, config })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Every original and corrected address must be in the table, and no
    /// package may have left the hub yet.
    pub fn validate(&self, registry: &PackageRegistry) -> DispatchResult<()> {
        for record in registry.all() {
            for address in record.known_addresses() {
                self.table.index_of(&address.street)?;
            }
            if record.status != DeliveryStatus::AtHub {
                return Err(DispatchError::InvalidTransition {
                    id: record.id(),
                    from: record.status,
                    to: DeliveryStatus::EnRoute,
                });
            }
        }
        Ok(())
    }

    pub fn plan(&self, registry: &PackageRegistry) -> DispatchResult<LoadingPlan> {
        self.validate(registry)?;
        build_loading_plan(registry, &self.config)
    }

    /// Run the whole day. Any error is returned before a single record or
    /// truck has been touched.
    pub fn run(&self, registry: &mut PackageRegistry) -> DispatchResult<DispatchReport> {
        let span = span!(Level::INFO, "dispatch", packages = registry.len());
        let _guard = span.enter();

        let plan = self.plan(registry)?;
        let router = Router::new(self.table, &self.config)?;

        let mut trucks: Vec<Truck> = (1..=self.config.truck_count)
            .map(|id| {
                Truck::new(
                    id,
                    self.config.truck_capacity,
                    router.hub(),
                    self.config.day_start,
                )
            })
            .collect();

        // resolve every stop up front so routing cannot fail half way
        let mut rounds: Vec<Vec<LegJob>> = vec![];
        for truck in trucks.iter_mut() {
            let legs: Vec<&LegPlan> = plan.legs_for(truck.id).collect();
            for (k, leg) in legs.iter().copied().enumerate() {
                truck.load_leg(leg.departure, leg.packages.iter().copied().collect())?;
                if rounds.len() <= k {
                    rounds.push(vec![]);
                }
                rounds[k].push(LegJob {
                    leg,
                    candidates: router.candidates(registry, &leg.packages)?,
                    final_leg: k + 1 == legs.len(),
                });
            }
        }

        let mut routes = vec![];
        for (k, jobs) in rounds.into_iter().enumerate() {
            let round_span = span!(Level::DEBUG, "routing", leg = k, trucks = jobs.len());
            let _round_guard = round_span.enter();

            let starts: Vec<NaiveTime> = jobs
                .iter()
                .map(|job| match trucks.get(job.leg.truck - 1) {
                    Some(truck) if k > 0 => truck.clock().max(job.leg.departure),
                    _ => job.leg.departure,
                })
                .collect();

            let planned: Vec<RoutePlan> = jobs
                .into_par_iter()
                .zip(starts)
                .map(|(job, departure)| {
                    router.plan(
                        job.leg.truck,
                        job.leg.leg,
                        departure,
                        job.candidates,
                        job.final_leg,
                    )
                })
                .collect();

            for route in &planned {
                let truck = trucks
                    .get_mut(route.truck - 1)
                    .ok_or(DispatchError::UnknownTruck(route.truck))?;
                router.replay(route, truck, registry)?;
            }
            routes.extend(planned);
        }

        let misses = deadline_misses(registry);
        for miss in &misses {
            warn!(
                "Package {} delivered at {} by truck {:?}, deadline {}",
                miss.package,
                format_time(miss.delivered_at),
                miss.truck,
                miss.deadline
            );
        }
        for record in registry.all() {
            if let Some(at) = record.delivered_at.filter(|&at| at > self.config.end_of_day) {
                warn!(
                    "Package {} delivered at {}, after end of day",
                    record.id(),
                    format_time(at)
                );
            }
        }

        let total = total_mileage(&trucks);
        for truck in &trucks {
            debug!(
                "Truck {}: {:.1} miles, delivered [{}]",
                truck.id,
                truck.mileage(),
                truck.delivered().iter().join(", ")
            );
        }
        let report = DispatchReport {
            plan,
            trucks,
            routes,
            deadline_misses: misses,
            total_mileage: total,
            mileage_budget: self.config.mileage_budget,
        };
        if report.within_mileage_budget() {
            info!(
                "Fleet drove {:.1} miles (budget {:.1})",
                total, self.config.mileage_budget
            );
        } else {
            warn!(
                "Fleet drove {:.1} miles, over the {:.1} mile budget",
                total, self.config.mileage_budget
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Address, Constraint, Deadline, Package};
    use crate::utils::time_of_day;

    // Hub - A 2, Hub - B 4, A - B 3, Hub - C 6, A - C 5, B - C 1.5
    fn table() -> DistanceTable {
        let names = ["Hub", "A", "B", "C"].iter().map(|s| s.to_string()).collect();
        DistanceTable::from_lower_triangle(
            names,
            &[
                vec![0.0],
                vec![2.0, 0.0],
                vec![4.0, 3.0, 0.0],
                vec![6.0, 5.0, 1.5, 0.0],
            ],
        )
        .unwrap()
    }

    fn config(trucks: usize, capacity: usize) -> DispatchConfig {
        DispatchConfig {
            truck_count: trucks,
            truck_capacity: capacity,
            hub_address: "Hub".into(),
            ..DispatchConfig::default()
        }
    }

    fn pkg(id: PackageId, street: &str) -> Package {
        Package::new(
            id,
            Address::new(street, "Salt Lake City", "84115"),
            Deadline::EndOfDay,
            1,
        )
    }

    #[test]
    fn delayed_package_holds_back_one_truck() {
        let t = table();
        let mut reg = PackageRegistry::from_packages(vec![
            pkg(1, "A"),
            pkg(2, "B"),
            pkg(3, "C"),
            pkg(4, "A").with_constraint(Constraint::DelayedUntil(time_of_day(9, 0))),
        ])
        .unwrap();
        let report = Dispatcher::new(&t, config(2, 2)).unwrap().run(&mut reg).unwrap();

        let t1 = report.truck(1).unwrap();
        let t2 = report.truck(2).unwrap();
        assert_eq!(t1.delivered(), vec![2, 3]);
        assert_eq!(t2.delivered(), vec![1, 4]);
        assert_eq!(t2.departure_time(), Some(time_of_day(9, 0)));
        assert!((t1.mileage() - 11.5).abs() < 1e-9);
        assert!((t2.mileage() - 4.0).abs() < 1e-9);
        assert!((report.total_mileage - 15.5).abs() < 1e-9);
        assert!(report.within_mileage_budget());
        assert!(report.deadline_misses.is_empty());

        let four = reg.lookup(4).unwrap();
        assert_eq!(four.departed_at, Some(time_of_day(9, 0)));
        assert_eq!(
            four.delivered_at,
            Some(NaiveTime::from_hms_opt(9, 6, 40).unwrap())
        );
    }

    #[test]
    fn second_leg_leaves_after_the_truck_is_back() {
        let t = table();
        let mut reg =
            PackageRegistry::from_packages(vec![pkg(1, "A"), pkg(2, "B"), pkg(3, "C")]).unwrap();
        let report = Dispatcher::new(&t, config(1, 2)).unwrap().run(&mut reg).unwrap();

        let truck = report.truck(1).unwrap();
        assert_eq!(truck.legs().len(), 2);
        assert!(truck.is_frozen());
        // leg 0: 2 + 3 + 4 miles, back at 8:30; leg 1: 6 out and 6 back
        assert!((truck.mileage() - 21.0).abs() < 1e-9);
        let three = reg.lookup(3).unwrap();
        assert_eq!(three.departed_at, Some(time_of_day(8, 30)));
        assert_eq!(three.delivered_at, Some(time_of_day(8, 50)));
        assert_eq!(report.routes.len(), 2);
    }

    #[test]
    fn missing_address_fails_before_any_mutation() {
        let t = table();
        let mut reg = PackageRegistry::from_packages(vec![pkg(1, "A"), pkg(2, "Nowhere")]).unwrap();
        let before = reg.clone();
        let err = Dispatcher::new(&t, config(2, 4))
            .unwrap()
            .run(&mut reg)
            .unwrap_err();
        assert_eq!(err, DispatchError::MissingAddress("Nowhere".into()));
        for id in [1, 2] {
            assert_eq!(reg.lookup(id), before.lookup(id));
        }
    }

    #[test]
    fn corrected_address_must_also_resolve() {
        let t = table();
        let mut reg = PackageRegistry::from_packages(vec![pkg(1, "A")]).unwrap();
        reg.correct_address(1, Address::new("Elsewhere", "Murray", "84107"), time_of_day(9, 0))
            .unwrap();
        assert_eq!(
            Dispatcher::new(&t, config(1, 4)).unwrap().run(&mut reg).unwrap_err(),
            DispatchError::MissingAddress("Elsewhere".into())
        );
        assert_eq!(reg.lookup(1).unwrap().status, DeliveryStatus::AtHub);
    }

    #[test]
    fn rerunning_a_dispatched_registry_is_rejected() {
        let t = table();
        let mut reg = PackageRegistry::from_packages(vec![pkg(1, "A")]).unwrap();
        let dispatcher = Dispatcher::new(&t, config(1, 4)).unwrap();
        dispatcher.run(&mut reg).unwrap();
        assert!(matches!(
            dispatcher.run(&mut reg),
            Err(DispatchError::InvalidTransition { id: 1, .. })
        ));
    }

    #[test]
    fn unknown_hub_is_rejected() {
        let t = table();
        assert!(matches!(
            Dispatcher::new(&t, DispatchConfig::default()),
            Err(DispatchError::MissingAddress(_))
        ));
    }

    #[test]
    fn late_address_does_not_hold_back_a_pinned_deadline() {
        let t = table();
        let due_nine = Package::new(
            2,
            Address::new("B", "Salt Lake City", "84115"),
            Deadline::At(time_of_day(9, 0)),
            1,
        );
        let mut reg = PackageRegistry::from_packages(vec![
            pkg(1, "A").with_constraint(Constraint::WrongAddressUntil(time_of_day(10, 20))),
            due_nine.with_constraint(Constraint::TruckOnly(3)),
        ])
        .unwrap();
        let report = Dispatcher::new(&t, config(3, 16)).unwrap().run(&mut reg).unwrap();

        assert!(report.deadline_misses.is_empty());
        assert_eq!(report.truck(3).unwrap().departure_time(), Some(time_of_day(8, 0)));
        assert_eq!(report.truck(2).unwrap().departure_time(), Some(time_of_day(10, 20)));
        // Hub - B is 4 miles
        assert_eq!(
            reg.lookup(2).unwrap().delivered_at,
            Some(NaiveTime::from_hms_opt(8, 13, 20).unwrap())
        );
    }

    #[test]
    fn unreachable_stop_pins_the_clock_to_the_last_second() {
        let names = ["Hub", "A", "Far"].iter().map(|s| s.to_string()).collect();
        let t = DistanceTable::from_lower_triangle(
            names,
            &[vec![0.0], vec![2.0, 0.0], vec![1e15, 1e15, 0.0]],
        )
        .unwrap();
        let mut reg = PackageRegistry::from_packages(vec![pkg(1, "A"), pkg(2, "Far")]).unwrap();
        let report = Dispatcher::new(&t, config(1, 4)).unwrap().run(&mut reg).unwrap();

        assert_eq!(
            reg.lookup(1).unwrap().delivered_at,
            Some(NaiveTime::from_hms_opt(8, 6, 40).unwrap())
        );
        assert_eq!(
            reg.lookup(2).unwrap().delivered_at,
            Some(NaiveTime::from_hms_opt(23, 59, 59).unwrap())
        );
        assert!(report.trucks[0].is_frozen());
        assert!(!report.within_mileage_budget());
    }

    #[test]
    fn summary_serializes() {
        let t = table();
        let mut reg = PackageRegistry::from_packages(vec![pkg(1, "B")]).unwrap();
        let report = Dispatcher::new(&t, config(2, 4)).unwrap().run(&mut reg).unwrap();
        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["within_budget"], true);
        assert_eq!(json["trucks"][0]["delivered"][0], 1);
        assert_eq!(json["total_mileage"], 8.0);
    }
}
