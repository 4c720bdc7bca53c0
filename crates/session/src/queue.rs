// MIDB - GDB Machine Interface Frontend
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Serialized fetch queues.
//!
//! Each queue keeps at most one job in flight. The caller starts the job a
//! queue hands back and must [`FetchQueue::settle`] it on success and on
//! failure alike; settling hands back the next job to start.

use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::varobj::ExprType;

/// Programmer errors in queue usage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A job was started while another one is still in flight
    #[error("{0} queue already has a job in flight")]
    Busy(&'static str),
}

/// Outcome of settling the in-flight job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled<J> {
    /// The job that just completed, if one was in flight
    pub finished: Option<J>,
    /// The next job, now in flight; the caller must start it
    pub next: Option<J>,
}

/// FIFO queue with a single in-flight slot
#[derive(Debug, Clone)]
pub struct FetchQueue<J> {
    name: &'static str,
    pending: VecDeque<J>,
    in_flight: Option<J>,
}

impl<J: Clone + std::fmt::Debug> FetchQueue<J> {
    /// Create an empty queue. `name` only shows up in logs and errors.
    pub fn new(name: &'static str) -> Self {
        Self { name, pending: VecDeque::new(), in_flight: None }
    }

    /// Queue a job. Returns it back if it became the in-flight job and must
    /// be started now.
    pub fn enqueue(&mut self, job: J) -> Option<J> {
        self.pending.push_back(job);
        self.drain_next()
    }

    /// Put a job directly in flight, bypassing the pending list.
    pub fn begin(&mut self, job: J) -> Result<J, QueueError> {
        if self.in_flight.is_some() {
            return Err(QueueError::Busy(self.name));
        }
        debug!(queue = self.name, ?job, "Job started");
        self.in_flight = Some(job.clone());
        Ok(job)
    }

    /// Complete the in-flight job (successfully or not) and move on.
    pub fn settle(&mut self) -> Settled<J> {
        let finished = self.in_flight.take();
        if finished.is_none() {
            debug!(queue = self.name, "Settled with nothing in flight");
        }
        let next = self.drain_next();
        Settled { finished, next }
    }

    /// The in-flight job
    pub fn in_flight(&self) -> Option<&J> {
        self.in_flight.as_ref()
    }

    /// Whether a job is in flight
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Jobs waiting behind the in-flight one
    pub fn pending(&self) -> impl Iterator<Item = &J> {
        self.pending.iter()
    }

    /// Number of waiting jobs
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every waiting job and forget the in-flight one
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = None;
    }

    fn drain_next(&mut self) -> Option<J> {
        if self.in_flight.is_some() {
            return None;
        }
        let job = self.pending.pop_front()?;
        debug!(queue = self.name, ?job, "Job started");
        self.in_flight = Some(job.clone());
        Some(job)
    }
}

/// Create a variable object for an expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateJob {
    /// Expression the user typed
    pub expression: String,
    /// Why the variable is created
    pub expr_type: ExprType,
}

/// List the children of a variable object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildrenJob {
    /// Debugger name of the parent
    pub parent: String,
    /// Purpose inherited by the children
    pub expr_type: ExprType,
}
