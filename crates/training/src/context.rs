//! The owning context.
//!
//! One `TrainingContext` owns the registry, the active-task gauge, the
//! clock, and the compile-id source; everything inside the core takes the
//! context (or its parts) by reference. A lazily initialized global is
//! provided for the API boundary, mirroring how a runtime embeds the
//! training core as a process singleton.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use lyra_common::Clock;

use crate::config::TrainingConfig;
use crate::graph::TrainingGraph;
use crate::task::ActiveTasks;

/// Owning context for the training-data core.
#[derive(Debug)]
pub struct TrainingContext {
    config: TrainingConfig,
    graph: TrainingGraph,
    active_tasks: Arc<ActiveTasks>,
    clock: Clock,
    next_compile_id: AtomicU64,
}

impl TrainingContext {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            graph: TrainingGraph::new(),
            active_tasks: Arc::new(ActiveTasks::new()),
            clock: Clock::new(),
            next_compile_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn graph(&self) -> &TrainingGraph {
        &self.graph
    }

    pub fn active_tasks(&self) -> &Arc<ActiveTasks> {
        &self.active_tasks
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Vend the next monotonic compile id.
    pub fn next_compile_id(&self) -> u64 {
        self.next_compile_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Block until every outstanding compile task has been destroyed.
    pub fn wait_for_no_active_tasks(&self) {
        self.active_tasks.wait_for_no_active_tasks();
    }
}

impl Default for TrainingContext {
    fn default() -> Self {
        Self::new(TrainingConfig::default())
    }
}

lazy_static! {
    static ref GLOBAL_CONTEXT: TrainingContext = TrainingContext::default();
}

/// The process-wide context. Prefer passing a [`TrainingContext`] by
/// reference inside the core; this accessor exists for embedders only.
pub fn global() -> &'static TrainingContext {
    &GLOBAL_CONTEXT
}
