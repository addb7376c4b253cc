use chrono::NaiveTime;
use serde::Serialize;

use crate::domain::registry::PackageRegistry;
use crate::domain::truck::Truck;
use crate::domain::types::{Deadline, DeliveryStatus, PackageId, TruckId};

/// A package that reached its address after its deadline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlineMiss {
    pub package: PackageId,
    pub truck: Option<TruckId>,
    pub deadline: Deadline,
    pub delivered_at: NaiveTime,
}

pub fn total_mileage(trucks: &[Truck]) -> f64 {
    trucks.iter().map(Truck::mileage).sum()
}

/// The fleet passes when it drives strictly less than the budget.
pub fn within_budget(total: f64, budget: f64) -> bool {
    total < budget
}

/// Delivered packages whose delivery time is past their deadline, by id.
pub fn deadline_misses(registry: &PackageRegistry) -> Vec<DeadlineMiss> {
    registry
        .all()
        .into_iter()
        .filter(|record| record.missed_deadline())
        .filter_map(|record| {
            Some(DeadlineMiss {
                package: record.id(),
                truck: record.truck,
                deadline: record.deadline(),
                delivered_at: record.delivered_at?,
            })
        })
        .collect()
}

pub fn undelivered(registry: &PackageRegistry) -> Vec<PackageId> {
    registry
        .all()
        .into_iter()
        .filter(|r| r.status != DeliveryStatus::Delivered)
        .map(|r| r.id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Address, Package};
    use crate::utils::time_of_day;

    fn registry() -> PackageRegistry {
        let addr = Address::new("2010 W 500 S", "Salt Lake City", "84104");
        PackageRegistry::from_packages(vec![
            Package::new(1, addr.clone(), Deadline::At(time_of_day(9, 0)), 1),
            Package::new(2, addr.clone(), Deadline::At(time_of_day(10, 30)), 1),
            Package::new(3, addr, Deadline::EndOfDay, 1),
        ])
        .unwrap()
    }

    #[test]
    fn late_deliveries_are_collected() {
        let mut reg = registry();
        for id in 1..=3 {
            reg.mark_en_route(id, 1, time_of_day(8, 0)).unwrap();
        }
        reg.mark_delivered(1, time_of_day(9, 0)).unwrap();
        reg.mark_delivered(2, time_of_day(10, 31)).unwrap();

        let misses = deadline_misses(&reg);
        assert_eq!(misses.len(), 1);
        assert!(reg.lookup(2).unwrap().missed_deadline());
        assert!(!reg.lookup(1).unwrap().missed_deadline());
        assert!(!reg.lookup(3).unwrap().missed_deadline());
        assert_eq!(misses[0].package, 2);
        assert_eq!(misses[0].truck, Some(1));
        assert_eq!(undelivered(&reg), vec![3]);
    }

    #[test]
    fn budget_is_strict() {
        assert!(within_budget(139.9, 140.0));
        assert!(!within_budget(140.0, 140.0));
    }

    #[test]
    fn fleet_mileage_sums_trucks() {
        let mut a = Truck::new(1, 16, 0, time_of_day(8, 0));
        let b = Truck::new(2, 16, 0, time_of_day(8, 0));
        a.load_leg(time_of_day(8, 0), vec![1]).unwrap();
        a.deliver(0, 1, 2, 4.5, time_of_day(8, 15)).unwrap();
        assert_eq!(total_mileage(&[a, b]), 4.5);
    }
}
