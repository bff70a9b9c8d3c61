//! Timed reveal plans and the cancellable task set that runs them.

use std::{future::Future, time::Duration};

use shared::protocol::GRID_SIZE;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::trace;

use crate::controller::RevealStage;

pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_GRID_LEAD: Duration = Duration::from_millis(50);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealTiming {
    /// Gap between two consecutive reveals within a stage.
    pub interval: Duration,
    /// Delay before the first grid cell so its transition is visible.
    pub grid_lead: Duration,
    /// Fade-in allowance after the last item before the stage counts as complete.
    pub settle: Duration,
}

impl Default for RevealTiming {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REVEAL_INTERVAL,
            grid_lead: DEFAULT_GRID_LEAD,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl RevealTiming {
    pub fn grid_plan(&self) -> RevealPlan {
        RevealPlan {
            stage: RevealStage::Grid,
            items: GRID_SIZE * GRID_SIZE,
            lead: self.grid_lead,
            interval: self.interval,
            settle: self.settle,
        }
    }

    pub fn glyph_plan(&self, items: usize) -> RevealPlan {
        RevealPlan {
            stage: RevealStage::Consonants,
            items,
            lead: Duration::ZERO,
            interval: self.interval,
            settle: self.settle,
        }
    }

    pub fn prophecy_plan(&self) -> RevealPlan {
        RevealPlan {
            stage: RevealStage::Prophecy,
            items: 0,
            lead: Duration::ZERO,
            interval: self.interval,
            settle: self.settle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPlan {
    pub stage: RevealStage,
    pub items: usize,
    pub lead: Duration,
    pub interval: Duration,
    pub settle: Duration,
}

impl RevealPlan {
    /// Offset of item `index` from the start of the stage.
    pub fn item_offset(&self, index: usize) -> Duration {
        self.lead + self.interval.saturating_mul(index as u32)
    }

    /// Offset at which the stage reports its animation complete.
    pub fn total_duration(&self) -> Duration {
        self.lead + self.interval.saturating_mul(self.items as u32) + self.settle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledStep {
    Revealed { stage: RevealStage, index: usize },
    Settled(RevealStage),
}

/// Join handles owned by one run. Dropping the set aborts every task in it.
#[derive(Debug, Default)]
pub struct TaskSet {
    handles: Vec<JoinHandle<()>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(tokio::spawn(task));
    }

    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(handle);
    }

    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Runs reveal plans for one run and reports their steps on a channel.
#[derive(Debug, Default)]
pub struct RevealScheduler {
    tasks: TaskSet,
}

impl RevealScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `plan` now. Item `i` is reported at `plan.item_offset(i)`, then
    /// the stage settles at `plan.total_duration()`. Steps stop as soon as
    /// the receiver is gone.
    pub fn schedule<T>(&mut self, plan: RevealPlan, tx: mpsc::UnboundedSender<T>)
    where
        T: From<ScheduledStep> + Send + 'static,
    {
        let started = Instant::now();
        self.tasks.spawn(async move {
            for index in 0..plan.items {
                sleep_until(started + plan.item_offset(index)).await;
                trace!(stage = ?plan.stage, index, "reveal tick");
                let step = ScheduledStep::Revealed {
                    stage: plan.stage,
                    index,
                };
                if tx.send(step.into()).is_err() {
                    return;
                }
            }
            sleep_until(started + plan.total_duration()).await;
            let _ = tx.send(ScheduledStep::Settled(plan.stage).into());
        });
    }

    /// Keeps a task that belongs to the run (the stream reader) in the same
    /// cancellation set.
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.track(handle);
    }

    pub fn pending(&self) -> usize {
        self.tasks.active()
    }

    pub fn cancel_all(&mut self) {
        self.tasks.abort_all();
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
