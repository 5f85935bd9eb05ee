//! Unit-of-work tracking for dispatched roles and pipeline steps.
//!
//! [`WorkTracker`] holds one record per tracked unit -- a role name in
//! dispatcher mode, a step id in pipeline mode. Decoder-driven callbacks
//! mutate the records; the status projector reads ordered snapshots.
//!
//! State machine per unit: `Idle -> Running` (on dispatch) `-> Done | Error`
//! (on process exit) `-> Idle` (on reset / pipeline re-run). A dispatch
//! targeting a `Running` unit is rejected synchronously -- it is never
//! queued. Elapsed time is recomputed from the stored start instant while
//! `Running` and frozen once the unit reaches a terminal state.
//!
//! State lives in a `HashMap` behind `Arc<Mutex<..>>`. The lock is never
//! held across an await, so mutation and read interleave only at
//! well-defined suspension points.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::decode::ProgressEvent;
use crate::error::TrackError;

/// Lifecycle status of one unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkStatus {
    /// Registered, nothing in flight.
    Idle,
    /// A child process is currently executing for this unit.
    Running,
    /// Last dispatch finished successfully.
    Done,
    /// Last dispatch failed; stays `Error` until the next reset.
    Error,
}

/// Internal mutable record. Callers see [`WorkSnapshot`] clones.
struct WorkUnit {
    status: WorkStatus,
    started_at: Option<Instant>,
    /// Elapsed milliseconds frozen at the last terminal transition.
    frozen_elapsed_ms: u64,
    last_activity: Option<String>,
    transcript: String,
}

impl WorkUnit {
    fn idle() -> Self {
        Self {
            status: WorkStatus::Idle,
            started_at: None,
            frozen_elapsed_ms: 0,
            last_activity: None,
            transcript: String::new(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        match self.status {
            WorkStatus::Running => self
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            _ => self.frozen_elapsed_ms,
        }
    }
}

/// Read-only view of one unit, returned by snapshot queries.
#[derive(Clone, Debug)]
pub struct WorkSnapshot {
    pub id: String,
    pub status: WorkStatus,
    pub elapsed_ms: u64,
    pub last_activity: Option<String>,
    pub transcript: String,
}

/// Shared tracker over all units of work. Cheap to clone.
#[derive(Clone, Default)]
pub struct WorkTracker {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    units: HashMap<String, WorkUnit>,
    /// Registration order, so pipeline steps project in declared order.
    order: Vec<String>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit as `Idle`. Registering an existing id is a no-op.
    pub fn register(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.units.contains_key(id) {
            inner.order.push(id.to_string());
            inner.units.insert(id.to_string(), WorkUnit::idle());
        }
    }

    /// Transition a unit to `Running`, clearing any prior transcript.
    ///
    /// Fails synchronously with [`TrackError::AlreadyRunning`] if the unit
    /// is already `Running` -- the caller must not start a second process
    /// for it.
    pub fn begin(&self, id: &str) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().unwrap();
        let unit = inner
            .units
            .get_mut(id)
            .ok_or_else(|| TrackError::UnknownUnit { id: id.to_string() })?;

        if unit.status == WorkStatus::Running {
            return Err(TrackError::AlreadyRunning { id: id.to_string() });
        }

        *unit = WorkUnit::idle();
        unit.status = WorkStatus::Running;
        unit.started_at = Some(Instant::now());
        Ok(())
    }

    /// Record a decoded progress event against a `Running` unit.
    ///
    /// Events against unknown or non-running units are ignored -- a killed
    /// process may still flush a few trailing events.
    pub fn observe(&self, id: &str, event: &ProgressEvent) {
        let mut inner = self.inner.lock().unwrap();
        let Some(unit) = inner.units.get_mut(id) else {
            return;
        };
        if unit.status != WorkStatus::Running {
            return;
        }

        match event {
            ProgressEvent::Text(delta) => {
                unit.transcript.push_str(delta);
                if let Some(line) = unit
                    .transcript
                    .rsplit('\n')
                    .find(|line| !line.trim().is_empty())
                {
                    unit.last_activity = Some(line.trim().to_string());
                }
            }
            ProgressEvent::ToolStart(name) => {
                unit.last_activity = Some(format!("tool: {name}"));
            }
            ProgressEvent::Completed { .. } => {}
        }
    }

    /// Transition a `Running` unit to `Done` or `Error`, freezing elapsed
    /// time. No-op for units not currently running.
    pub fn finish(&self, id: &str, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(unit) = inner.units.get_mut(id) {
            if unit.status != WorkStatus::Running {
                return;
            }
            unit.frozen_elapsed_ms = unit.elapsed_ms();
            unit.status = if success {
                WorkStatus::Done
            } else {
                WorkStatus::Error
            };
        }
    }

    /// Reset one unit to `Idle`, discarding its transcript.
    pub fn reset(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(unit) = inner.units.get_mut(id) {
            *unit = WorkUnit::idle();
        }
    }

    /// Reset every unit to `Idle` (session start / pipeline re-run).
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for unit in inner.units.values_mut() {
            *unit = WorkUnit::idle();
        }
    }

    /// Snapshot of one unit, or `None` if not tracked.
    pub fn snapshot_of(&self, id: &str) -> Option<WorkSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.units.get(id).map(|unit| snapshot(id, unit))
    }

    /// Ordered snapshots of every tracked unit.
    pub fn snapshot(&self) -> Vec<WorkSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.units.get(id).map(|unit| snapshot(id, unit)))
            .collect()
    }
}

fn snapshot(id: &str, unit: &WorkUnit) -> WorkSnapshot {
    WorkSnapshot {
        id: id.to_string(),
        status: unit.status,
        elapsed_ms: unit.elapsed_ms(),
        last_activity: unit.last_activity.clone(),
        transcript: unit.transcript.clone(),
    }
}
