// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The scheduler's in-memory tables: jobs, the admission/assignment
//! queues, and the worker and slot-runner registries. One
//! [`SchedulerTables`] owns all mutable scheduler state so the event
//! loop never needs to reach across multiple independently-locked
//! structures.

use crate::entities::{Job, Worker};
use crate::types::{JobName, Slot, TaskName, WorkerAddr};
use std::collections::{HashMap, VecDeque};

/// All state the scheduler's event loop reads and mutates each tick.
///
/// Queue pop order is intentionally asymmetric, matching the source
/// system and kept per `spec.md` §9: jobs are admitted FIFO (oldest
/// submission first), but workers and tasks are matched LIFO (a worker
/// that just went idle, and the task queued most recently, pair up
/// first). Neither is "more correct" — the asymmetry is existing
/// behavior this rewrite preserves rather than "fixes".
#[derive(Default)]
pub struct SchedulerTables {
    /// Every job the scheduler is tracking, keyed by name.
    pub jobs: HashMap<JobName, Job>,
    /// Job names admitted but not yet given a slot, oldest first.
    pub queued_jobs: VecDeque<JobName>,
    /// Task names queued for a worker, most recently queued first.
    pub queued_tasks: Vec<TaskName>,
    /// Worker addresses blocked in `worker_available`, most recently
    /// blocked first.
    pub queued_workers: Vec<WorkerAddr>,
    /// Task name -> worker address, for tasks currently assigned.
    pub running_tasks: HashMap<TaskName, WorkerAddr>,
    /// Coordinator slots not currently claimed by a running job.
    pub available_slots: Vec<Slot>,
    /// Slot -> job name, for slots currently claimed.
    pub slot_job_map: HashMap<String, JobName>,
    /// Every worker the scheduler has ever heard from, keyed by
    /// transport address.
    pub workers: HashMap<WorkerAddr, Worker>,
}

impl SchedulerTables {
    /// Construct an empty table set seeded with the given slot pool.
    /// `slots` is pushed in order, so the *last* element is the first
    /// one [`Self::claim_slot`] hands out (`spec.md` §12).
    #[must_use]
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            available_slots: slots,
            ..Self::default()
        }
    }

    /// Pop a slot off the LIFO pool, if any are free.
    pub fn claim_slot(&mut self) -> Option<Slot> {
        self.available_slots.pop()
    }

    /// Return a slot to the LIFO pool once its job is fully reaped.
    pub fn release_slot(&mut self, slot: Slot) {
        self.available_slots.push(slot);
    }

    /// Pop the oldest queued job name, if any (FIFO).
    pub fn pop_queued_job(&mut self) -> Option<JobName> {
        self.queued_jobs.pop_front()
    }

    /// Pop the most recently queued worker address, if any (LIFO).
    pub fn pop_queued_worker(&mut self) -> Option<WorkerAddr> {
        self.queued_workers.pop()
    }

    /// Pop the most recently queued task name, if any (LIFO).
    pub fn pop_queued_task(&mut self) -> Option<TaskName> {
        self.queued_tasks.pop()
    }

    /// Look up or lazily create the [`Worker`] for `addr`. Workers are
    /// never explicitly registered; the first worker-originated
    /// message from a new address creates one (`spec.md` §9).
    pub fn worker_mut(&mut self, addr: &str) -> &mut Worker {
        self.workers
            .entry(addr.to_string())
            .or_insert_with(|| Worker::new(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pool_is_lifo() {
        let mut tables = SchedulerTables::new(vec![
            Slot::new("127.0.0.1", 1),
            Slot::new("127.0.0.1", 2),
            Slot::new("127.0.0.1", 3),
        ]);
        assert_eq!(tables.claim_slot(), Some(Slot::new("127.0.0.1", 3)));
        assert_eq!(tables.claim_slot(), Some(Slot::new("127.0.0.1", 2)));
        tables.release_slot(Slot::new("127.0.0.1", 9));
        assert_eq!(tables.claim_slot(), Some(Slot::new("127.0.0.1", 9)));
    }

    #[test]
    fn worker_is_implicitly_registered() {
        let mut tables = SchedulerTables::default();
        assert!(tables.workers.is_empty());
        tables.worker_mut("tcp://10.0.0.1:1").touch();
        assert_eq!(tables.workers.len(), 1);
    }
}
