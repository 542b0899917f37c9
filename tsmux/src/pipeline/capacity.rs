//! Dynamic concurrency gate for conversion jobs.
//!
//! Capacity is a semaphore whose permit count follows a target. Raising the
//! target adds permits at once. Lowering it never revokes a held permit:
//! instead, permits are forgotten on release until the number in circulation
//! matches the target again, so running jobs are never interrupted.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct Gate {
    /// Capacity the pool should converge to.
    target: usize,
    /// Permits currently in circulation (held or available).
    issued: usize,
    max: usize,
}

/// Tracks the worker capacity of a single run.
#[derive(Debug)]
pub struct CapacityController {
    semaphore: Arc<Semaphore>,
    gate: Mutex<Gate>,
}

impl CapacityController {
    /// Create a gate with `initial` permits, bounded by `1..=max`.
    pub fn new(initial: usize, max: usize) -> Self {
        let max = max.max(1);
        let initial = initial.clamp(1, max);
        Self {
            semaphore: Arc::new(Semaphore::new(initial)),
            gate: Mutex::new(Gate {
                target: initial,
                issued: initial,
                max,
            }),
        }
    }

    /// Current target capacity.
    pub fn capacity(&self) -> usize {
        self.gate.lock().target
    }

    #[cfg(test)]
    fn max(&self) -> usize {
        self.gate.lock().max
    }

    /// Permits in circulation; exceeds [`capacity`](Self::capacity) while a
    /// decrease is still pending.
    #[cfg(test)]
    fn issued(&self) -> usize {
        self.gate.lock().issued
    }

    /// Permits that can be acquired right now.
    #[cfg(test)]
    fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a permit. `None` once the gate is closed.
    pub async fn acquire(self: &Arc<Self>) -> Option<CapacityPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        Some(CapacityPermit {
            permit: Some(permit),
            controller: Arc::clone(self),
        })
    }

    /// Move the target to `recommended`, clamped to `1..=max`.
    ///
    /// Returns the new capacity if it changed.
    pub fn set_capacity(&self, recommended: usize) -> Option<usize> {
        let mut gate = self.gate.lock();
        let target = recommended.clamp(1, gate.max);
        if target == gate.target {
            return None;
        }

        gate.target = target;
        if target > gate.issued {
            self.semaphore.add_permits(target - gate.issued);
            gate.issued = target;
        }
        Some(target)
    }

    /// Stop handing out permits; pending and later acquisitions get `None`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        let mut gate = self.gate.lock();
        if gate.issued > gate.target {
            gate.issued -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }
}

/// A held slot of capacity. Released (or retired) on drop.
#[derive(Debug)]
pub struct CapacityPermit {
    permit: Option<OwnedSemaphorePermit>,
    controller: Arc<CapacityController>,
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.controller.release(permit);
        }
    }
}
