use chrono::NaiveTime;
use serde::Serialize;

use crate::distance::matrix::DistanceTable;
use crate::domain::types::{Deadline, PackageId};
use crate::utils::{advance, travel_time};

/// An undelivered package as the router sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub package: PackageId,
    /// Distance table index of the delivery address.
    pub location: usize,
    pub deadline: Deadline,
}

/// Why a stop was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Pick {
    Nearest,
    /// Would miss its deadline if the nearest stop went first.
    Urgent,
    /// Misses its deadline whatever happens; delivered as early as possible.
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub pick: Pick,
}

/// Where the truck is and what time it is when choosing the next stop.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub table: &'a DistanceTable,
    pub position: usize,
    pub now: NaiveTime,
    pub speed: f64,
}

impl SelectionContext<'_> {
    fn distance_to(&self, c: &Candidate) -> f64 {
        self.table.distance(self.position, c.location)
    }

    fn arrival(&self, from: NaiveTime, distance: f64) -> NaiveTime {
        advance(from, travel_time(distance, self.speed))
    }
}

/// Closest candidate; ties go to the earlier deadline, then the lower id.
pub fn nearest(ctx: &SelectionContext, candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            ctx.distance_to(a)
                .total_cmp(&ctx.distance_to(b))
                .then(a.deadline.cmp(&b.deadline))
                .then(a.package.cmp(&b.package))
        })
        .map(|(i, _)| i)
}

/// Feasibility filter: candidates whose deadline is at risk if the truck
/// heads for `nearest` first.
pub fn deadline_risks(
    ctx: &SelectionContext,
    candidates: &[Candidate],
    nearest: usize,
) -> Vec<(usize, Pick)> {
    let n = &candidates[nearest];
    let at_nearest = ctx.arrival(ctx.now, ctx.distance_to(n));

    candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            let due = c.deadline.time()?;
            let direct = ctx.arrival(ctx.now, ctx.distance_to(c));
            if direct > due {
                return Some((i, Pick::Late));
            }
            if i == nearest {
                return None;
            }
            let via_nearest = ctx.arrival(at_nearest, ctx.table.distance(n.location, c.location));
            (via_nearest > due).then_some((i, Pick::Urgent))
        })
        .collect()
}

/// Two-phase choice of the next stop: at-risk deadlines first (urgent before
/// late, earliest deadline, then distance, then id), otherwise the nearest.
pub fn select_next(ctx: &SelectionContext, candidates: &[Candidate]) -> Option<Selection> {
    let closest = nearest(ctx, candidates)?;
    let risks = deadline_risks(ctx, candidates, closest);

    let forced = [Pick::Urgent, Pick::Late].into_iter().find_map(|kind| {
        risks
            .iter()
            .filter(|(_, pick)| *pick == kind)
            .min_by(|(a, _), (b, _)| {
                let (a, b) = (&candidates[*a], &candidates[*b]);
                a.deadline
                    .cmp(&b.deadline)
                    .then(ctx.distance_to(a).total_cmp(&ctx.distance_to(b)))
                    .then(a.package.cmp(&b.package))
            })
            .map(|&(index, pick)| Selection { index, pick })
    });

    Some(forced.unwrap_or(Selection {
        index: closest,
        pick: Pick::Nearest,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time_of_day;

    // Hub, Near (1 mi), Far (9 mi), Near Twin (same spot as Near); Near-Far 9 mi.
    fn table() -> DistanceTable {
        let names = ["Hub", "Near", "Far", "Near Twin"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        DistanceTable::from_lower_triangle(
            names,
            &[
                vec![0.0],
                vec![1.0, 0.0],
                vec![9.0, 9.0, 0.0],
                vec![1.0, 0.0, 9.0, 0.0],
            ],
        )
        .unwrap()
    }

    fn ctx(table: &DistanceTable, h: u32, m: u32) -> SelectionContext<'_> {
        SelectionContext {
            table,
            position: 0,
            now: time_of_day(h, m),
            speed: 18.0,
        }
    }

    fn cand(package: PackageId, location: usize, deadline: Deadline) -> Candidate {
        Candidate {
            package,
            location,
            deadline,
        }
    }

    #[test]
    fn picks_nearest_when_no_deadline_is_at_risk() {
        let t = table();
        let c = [cand(1, 2, Deadline::EndOfDay), cand(2, 1, Deadline::EndOfDay)];
        assert_eq!(
            select_next(&ctx(&t, 8, 0), &c),
            Some(Selection { index: 1, pick: Pick::Nearest })
        );
    }

    #[test]
    fn tie_breaks_by_deadline_then_id() {
        let t = table();
        let c = [
            cand(7, 1, Deadline::EndOfDay),
            cand(5, 3, Deadline::EndOfDay),
            cand(6, 1, Deadline::At(time_of_day(10, 30))),
        ];
        assert_eq!(nearest(&ctx(&t, 8, 0), &c), Some(2));

        let c = [cand(7, 1, Deadline::EndOfDay), cand(5, 3, Deadline::EndOfDay)];
        assert_eq!(nearest(&ctx(&t, 8, 0), &c), Some(1));
    }

    #[test]
    fn urgent_deadline_overrides_distance() {
        let t = table();
        // Far is 30 min direct but 33 min via Near. Due 8:31.
        let c = [
            cand(1, 1, Deadline::EndOfDay),
            cand(2, 2, Deadline::At(time_of_day(8, 31))),
        ];
        let picked = select_next(&ctx(&t, 8, 0), &c).unwrap();
        assert_eq!(picked, Selection { index: 1, pick: Pick::Urgent });
    }

    #[test]
    fn slack_deadline_does_not_override() {
        let t = table();
        let c = [
            cand(1, 1, Deadline::EndOfDay),
            cand(2, 2, Deadline::At(time_of_day(10, 30))),
        ];
        assert_eq!(select_next(&ctx(&t, 8, 0), &c).unwrap().pick, Pick::Nearest);
    }

    #[test]
    fn hopeless_deadline_is_served_first_but_marked_late() {
        let t = table();
        let c = [
            cand(1, 1, Deadline::EndOfDay),
            cand(2, 2, Deadline::At(time_of_day(8, 10))),
        ];
        assert_eq!(
            select_next(&ctx(&t, 8, 0), &c),
            Some(Selection { index: 1, pick: Pick::Late })
        );
    }

    #[test]
    fn urgent_beats_late() {
        let t = table();
        let c = [
            cand(1, 1, Deadline::EndOfDay),
            cand(2, 2, Deadline::At(time_of_day(8, 31))),
            cand(3, 2, Deadline::At(time_of_day(8, 5))),
        ];
        let picked = select_next(&ctx(&t, 8, 0), &c).unwrap();
        assert_eq!(picked, Selection { index: 1, pick: Pick::Urgent });
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let t = table();
        assert_eq!(select_next(&ctx(&t, 8, 0), &[]), None);
    }
}
