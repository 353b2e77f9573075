//! The window itself: a pure accumulator with no I/O, kept separate from
//! `worker.rs` so the aggregation and cycle-protection rules can be tested
//! without a database or task bus.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub robot_id: Uuid,
    pub reference_ids: Vec<Uuid>,
    pub originating_robot_id: Option<Uuid>,
}

#[derive(Default)]
struct RobotWindow {
    reference_ids: BTreeSet<Uuid>,
    triggering_robot_ids: BTreeSet<Uuid>,
}

/// Accumulates `(robot_id, reference_id)` percolate hits between flushes,
/// one bucket per robot. Flushing drains the whole window and yields one
/// `PendingRequest` per robot that had at least one hit.
#[derive(Default)]
pub struct Window {
    by_robot: HashMap<Uuid, RobotWindow>,
}

impl Window {
    pub fn add(&mut self, robot_id: Uuid, reference_id: Uuid, triggering_robot_id: Option<Uuid>) {
        let entry = self.by_robot.entry(robot_id).or_default();
        entry.reference_ids.insert(reference_id);
        if let Some(triggering) = triggering_robot_id {
            entry.triggering_robot_ids.insert(triggering);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_robot.is_empty()
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.by_robot)
            .into_iter()
            .map(|(robot_id, w)| PendingRequest {
                robot_id,
                reference_ids: w.reference_ids.into_iter().collect(),
                // Only record an originating robot when every hit in this
                // robot's bucket this window agrees on who triggered it —
                // a mixed bucket has no single answer, so cycle protection
                // on the *next* round falls back to "no known originator"
                // rather than guessing wrong.
                originating_robot_id: single(w.triggering_robot_ids),
            })
            .collect()
    }
}

fn single(set: BTreeSet<Uuid>) -> Option<Uuid> {
    let mut iter = set.into_iter();
    let first = iter.next()?;
    if iter.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_distinct_references_per_robot() {
        let mut w = Window::default();
        let robot = Uuid::new_v4();
        let r1 = Uuid::new_v4();
        let r2 = Uuid::new_v4();
        w.add(robot, r1, None);
        w.add(robot, r1, None);
        w.add(robot, r2, None);

        let drained = w.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].robot_id, robot);
        assert_eq!(drained[0].reference_ids.len(), 2);
        assert!(w.is_empty());
    }

    #[test]
    fn records_originating_robot_only_when_unambiguous() {
        let mut w = Window::default();
        let robot = Uuid::new_v4();
        let trigger = Uuid::new_v4();
        w.add(robot, Uuid::new_v4(), Some(trigger));
        w.add(robot, Uuid::new_v4(), Some(trigger));

        let drained = w.drain();
        assert_eq!(drained[0].originating_robot_id, Some(trigger));
    }

    #[test]
    fn mixed_triggers_leave_originating_robot_unset() {
        let mut w = Window::default();
        let robot = Uuid::new_v4();
        w.add(robot, Uuid::new_v4(), Some(Uuid::new_v4()));
        w.add(robot, Uuid::new_v4(), Some(Uuid::new_v4()));

        let drained = w.drain();
        assert_eq!(drained[0].originating_robot_id, None);
    }

    #[test]
    fn drain_is_empty_after_a_prior_drain() {
        let mut w = Window::default();
        w.add(Uuid::new_v4(), Uuid::new_v4(), None);
        let _ = w.drain();
        assert!(w.drain().is_empty());
    }
}
