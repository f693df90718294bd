// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// FIFO of jobs waiting for dispatch, with de-duplication.
//
// A job is refused when its id is already queued, is the one in flight, or
// is among the most recently dispatched ids. The recent set is bounded; the
// oldest id is forgotten first.

use std::collections::{HashSet, VecDeque};

use printbridge_core::types::{Job, JobId};

/// Result of offering a job to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    AlreadyQueued,
    InFlight,
    RecentlyDispatched,
}

impl Offer {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

#[derive(Debug)]
struct RecentIds {
    order: VecDeque<JobId>,
    members: HashSet<JobId>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &JobId) -> bool {
        self.members.contains(id)
    }

    fn remember(&mut self, id: JobId) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Per-station dispatch queue.
#[derive(Debug)]
pub struct JobQueue {
    pending: VecDeque<Job>,
    in_flight: Option<JobId>,
    recent: RecentIds,
}

impl JobQueue {
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            recent: RecentIds::new(recent_capacity),
        }
    }

    /// Append `job` unless it is a duplicate.
    pub fn offer(&mut self, job: Job) -> Offer {
        if self.in_flight.as_ref() == Some(&job.id) {
            return Offer::InFlight;
        }
        if self.recent.contains(&job.id) {
            return Offer::RecentlyDispatched;
        }
        if self.pending.iter().any(|j| j.id == job.id) {
            return Offer::AlreadyQueued;
        }
        self.pending.push_back(job);
        Offer::Queued
    }

    /// Take the next job and mark it in flight. `None` while another job is
    /// still in flight or nothing is queued.
    pub fn start_next(&mut self) -> Option<Job> {
        if self.in_flight.is_some() {
            return None;
        }
        let job = self.pending.pop_front()?;
        self.in_flight = Some(job.id.clone());
        Some(job)
    }

    /// Finish the in-flight job. Dispatched jobs are remembered so late
    /// deliveries of the same id are refused; a job whose claim failed is
    /// not, so a later poll can offer it again.
    pub fn finish(&mut self, id: &JobId, dispatched: bool) {
        if self.in_flight.as_ref() == Some(id) {
            self.in_flight = None;
        }
        if dispatched {
            self.recent.remember(id.clone());
        }
    }

    /// Abandon everything queued. The in-flight job, if any, still finishes.
    pub fn abandon(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.recent.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> Option<&JobId> {
        self.in_flight.as_ref()
    }
}
