//! Invocation counting.
//!
//! The guest brackets every workload invocation with a work-item begin/end pair. The
//! [`InvocationCounter`] turns those markers into the two budget-exhaustion events the
//! controller acts on: warm-up complete and measurement complete. It only ever mutates
//! the budget of the window the controller has opened.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remaining invocations per phase. Negative values are the inactive sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationBudget {
    /// Invocations left before warm-up ends.
    pub warm_remaining: i64,
    /// Invocations left before measurement ends.
    pub measure_remaining: i64,
}

impl InvocationBudget {
    /// Sentinel for a budget that is not engaged.
    pub const INACTIVE: i64 = -1;

    /// Budget with both counts given.
    pub const fn new(warm: i64, measure: i64) -> Self {
        Self {
            warm_remaining: warm,
            measure_remaining: measure,
        }
    }

    /// Whether `remaining` is an engaged budget (zero counts as engaged and exhausted).
    pub const fn is_active(remaining: i64) -> bool {
        remaining >= 0
    }
}

/// Which budget work items currently count against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountWindow {
    /// Outside warm-up and measurement; markers are not counted.
    #[default]
    Idle,
    /// Counting against the warm budget.
    Warm,
    /// Counting against the measure budget.
    Measure,
}

impl fmt::Display for CountWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Work-item markers that do not pair up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CounterError {
    /// A begin arrived while another invocation was still open. The new id replaces it.
    #[error("work item {got} began while {open} was still open")]
    NestedBegin {
        /// Invocation still open.
        open: u64,
        /// Invocation that began.
        got: u64,
    },
    /// An end that does not close the open invocation. Not counted.
    #[error("work item {got} ended but {} was open", open.map_or_else(|| "none".to_owned(), |id| id.to_string()))]
    UnmatchedEnd {
        /// Invocation open at the time, if any.
        open: Option<u64>,
        /// Invocation that ended.
        got: u64,
    },
}

/// Counts matched work-item pairs against the warm and measure budgets.
#[derive(Clone, Debug)]
pub struct InvocationCounter {
    budget: InvocationBudget,
    window: CountWindow,
    open: Option<u64>,
    warm_counted: u64,
    measure_counted: u64,
}

impl InvocationCounter {
    /// Counter starting with `budget`, outside any window.
    pub const fn new(budget: InvocationBudget) -> Self {
        Self {
            budget,
            window: CountWindow::Idle,
            open: None,
            warm_counted: 0,
            measure_counted: 0,
        }
    }

    /// Current budget.
    pub const fn budget(&self) -> InvocationBudget {
        self.budget
    }

    /// Open window.
    pub const fn window(&self) -> CountWindow {
        self.window
    }

    /// Invocations counted during warm-up, capped at the warm budget when one is engaged.
    pub const fn warm_counted(&self) -> u64 {
        self.warm_counted
    }

    /// Invocations counted during measurement, capped at the measure budget when one
    /// is engaged.
    pub const fn measure_counted(&self) -> u64 {
        self.measure_counted
    }

    /// Opens `window`. Any invocation left open in the previous window is dropped.
    pub const fn set_window(&mut self, window: CountWindow) {
        self.window = window;
        self.open = None;
    }

    /// Disengages the warm budget (resuming past warm-up).
    pub const fn disable_warm(&mut self) {
        self.budget.warm_remaining = InvocationBudget::INACTIVE;
    }

    /// Whether the budget of the open window is engaged.
    pub const fn window_active(&self) -> bool {
        match self.window {
            CountWindow::Idle => false,
            CountWindow::Warm => InvocationBudget::is_active(self.budget.warm_remaining),
            CountWindow::Measure => InvocationBudget::is_active(self.budget.measure_remaining),
        }
    }

    /// Records the start of invocation `id`.
    ///
    /// # Errors
    ///
    /// [`CounterError::NestedBegin`] when another invocation was still open; `id`
    /// becomes the open invocation regardless.
    pub fn on_work_begin(&mut self, id: u64) -> Result<(), CounterError> {
        if self.window == CountWindow::Idle {
            return Ok(());
        }
        match self.open.replace(id) {
            Some(open) => Err(CounterError::NestedBegin { open, got: id }),
            None => Ok(()),
        }
    }

    /// Records the end of invocation `id`.
    ///
    /// The engaged budget of the open window is decremented while positive. Reaching
    /// zero happens once; later ends leave it at zero and are not counted. Without an
    /// engaged budget every matched end is counted.
    ///
    /// # Returns
    ///
    /// `true` exactly when this end took the window's budget from one to zero.
    ///
    /// # Errors
    ///
    /// [`CounterError::UnmatchedEnd`] when `id` does not close the open invocation.
    pub fn on_work_end(&mut self, id: u64) -> Result<bool, CounterError> {
        let remaining = match self.window {
            CountWindow::Idle => return Ok(false),
            CountWindow::Warm => &mut self.budget.warm_remaining,
            CountWindow::Measure => &mut self.budget.measure_remaining,
        };
        if self.open != Some(id) {
            return Err(CounterError::UnmatchedEnd {
                open: self.open,
                got: id,
            });
        }
        self.open = None;

        let exhausted = match *remaining {
            0 => return Ok(false),
            r if r > 0 => {
                *remaining -= 1;
                *remaining == 0
            }
            _ => false,
        };
        match self.window {
            CountWindow::Warm => self.warm_counted += 1,
            CountWindow::Measure => self.measure_counted += 1,
            CountWindow::Idle => {}
        }
        Ok(exhausted)
    }
}
