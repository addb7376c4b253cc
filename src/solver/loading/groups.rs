use std::collections::HashMap;

use chrono::NaiveTime;
use itertools::Itertools;
use tracing::debug;

use crate::domain::registry::PackageRegistry;
use crate::domain::types::{Deadline, PackageId, TruckId};
use crate::error::{DispatchError, DispatchResult};

/// Packages that must ride together, with the constraints they share.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadUnit {
    /// Sorted ascending.
    pub ids: Vec<PackageId>,
    pub pin: Option<TruckId>,
    pub hold: Option<NaiveTime>,
    /// Earliest deadline among the members.
    pub deadline: Deadline,
    /// Delivery streets of the members, deduplicated.
    pub streets: Vec<String>,
}

impl LoadUnit {
    pub fn min_id(&self) -> PackageId {
        self.ids[0]
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Transitive closure of every grouped-with note. Each group is sorted and
/// groups are ordered by their smallest id; ungrouped packages form singletons.
pub fn constraint_groups(registry: &PackageRegistry) -> DispatchResult<Vec<Vec<PackageId>>> {
    let ids = registry.ids();
    let position: HashMap<PackageId, usize> =
        ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut sets = DisjointSet::new(ids.len());

    for record in registry.all() {
        let me = position[&record.id()];
        for other in record.package.grouped_with() {
            let them = *position
                .get(&other)
                .ok_or(DispatchError::UnknownPackage(other))?;
            sets.union(me, them);
        }
    }

    let mut groups: HashMap<usize, Vec<PackageId>> = HashMap::new();
    for (i, &id) in ids.iter().enumerate() {
        groups.entry(sets.find(i)).or_default().push(id);
    }

    // ids were visited in ascending order, so every group is already sorted
    Ok(groups
        .into_values()
        .sorted_by_key(|g| g[0])
        .collect())
}

/// Resolve groups into load units, checking capacity and pin consistency.
pub fn build_units(
    registry: &PackageRegistry,
    truck_count: usize,
    capacity: usize,
) -> DispatchResult<Vec<LoadUnit>> {
    let mut units = vec![];

    for ids in constraint_groups(registry)? {
        if ids.len() > capacity {
            return Err(DispatchError::CapacityExceeded { ids, capacity });
        }

        let mut pins = vec![];
        let mut hold = None;
        let mut deadline = Deadline::EndOfDay;
        let mut streets: Vec<String> = vec![];

        for &id in &ids {
            let record = registry.get(id)?;
            pins.extend(record.package.truck_pins());
            hold = hold.max(record.package.hold_until());
            deadline = deadline.min(record.deadline());
            let street = record.delivery_address().street.clone();
            if !streets.contains(&street) {
                streets.push(street);
            }
        }

        pins.sort_unstable();
        pins.dedup();
        let pin = match pins.as_slice() {
            [] => None,
            [truck] if (1..=truck_count).contains(truck) => Some(*truck),
            [truck] => {
                return Err(DispatchError::ConstraintConflict {
                    ids,
                    reason: format!("truck {} is not in a fleet of {}", truck, truck_count),
                })
            }
            many => {
                return Err(DispatchError::ConstraintConflict {
                    reason: format!("pinned to trucks {}", many.iter().join(" and ")),
                    ids,
                })
            }
        };

        if ids.len() > 1 {
            debug!(
                "Group [{}] pin={:?} hold={:?} deadline={}",
                ids.iter().join(", "),
                pin,
                hold,
                deadline
            );
        }

        units.push(LoadUnit {
            ids,
            pin,
            hold,
            deadline,
            streets,
        });
    }

    Ok(units)
}
