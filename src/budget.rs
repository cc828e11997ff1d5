//! Multi-dimensional budget tracking for the RLM execution tree.
//!
//! One [`BudgetController`] is owned by exactly one executor. It tracks
//! cumulative usage across five independent dimensions (cost, tokens,
//! wall-clock time, iterations, recursion depth) and derives sub-budgets
//! for recursive calls from its own remaining headroom.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// The kind of operation a `canProceed` check gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// One more REPL turn in the current executor.
    Iteration,
    /// A recursive sub-call (`rlm_query`) at the given depth.
    Subcall(u32),
}

/// Five hard caps, all non-negative. Any field left unset by a partial
/// override falls back to [`Budget::default`]'s value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Monetary cap in USD.
    pub max_cost: f64,
    /// Combined input+output token cap.
    pub max_tokens: u64,
    /// Wall-clock cap in milliseconds.
    pub max_time_ms: u64,
    /// Recursion depth cap: a `depth=d` subcall is permitted iff `d < max_depth`.
    pub max_depth: u32,
    /// REPL-turn cap per executor.
    pub max_iterations: u32,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_cost: 5.0,
            max_tokens: 500_000,
            max_time_ms: 300_000,
            max_depth: 2,
            max_iterations: 30,
        }
    }
}

/// A partial override of [`Budget`], as handed down through `Config`,
/// `execute()` options, or [`BudgetController::get_sub_budget`]. Fields
/// left `None` inherit from whatever base budget it is merged onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialBudget {
    pub max_cost: Option<f64>,
    pub max_tokens: Option<u64>,
    pub max_time_ms: Option<u64>,
    pub max_depth: Option<u32>,
    pub max_iterations: Option<u32>,
}

impl PartialBudget {
    /// Merge `self` over `base`, with `self`'s set fields winning.
    pub fn merge_over(self, base: Budget) -> Budget {
        Budget {
            max_cost: self.max_cost.unwrap_or(base.max_cost),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            max_time_ms: self.max_time_ms.unwrap_or(base.max_time_ms),
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            max_iterations: self.max_iterations.unwrap_or(base.max_iterations),
        }
    }
}

/// Mutable usage accumulator owned by one [`BudgetController`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub iterations: u32,
    pub subcalls: u32,
    pub max_depth_reached: u32,
}

/// Fields to add to a [`Usage`] accumulator. All fields are additive
/// except `depth`, which raises `max_depth_reached` monotonically.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDelta {
    pub cost: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub iteration: bool,
    pub subcall: bool,
    pub depth: Option<u32>,
}

/// The remaining headroom in each dimension, as reported by
/// [`BudgetController::get_remaining`]. Negative differences clamp to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Remaining {
    pub cost: f64,
    pub tokens: u64,
    pub time_ms: u64,
    pub depth: u32,
    pub iterations: u32,
}

/// A dimension that has crossed its 80% warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnDimension {
    Cost,
    Tokens,
    Time,
}

/// A single 80%-threshold warning, as passed to the warning handler.
#[derive(Debug, Clone)]
pub struct BudgetWarning {
    pub dimension: WarnDimension,
    pub message: String,
}

/// Tracks usage against one [`Budget`] and derives sub-budgets.
///
/// Single-threaded: all methods take `&mut self` except the read-only
/// queries, matching the executor's cooperative single-task scheduling
/// model (no locking is needed — see the concurrency section of the
/// specification this implements).
pub struct BudgetController {
    budget: Budget,
    usage: Usage,
    started_at: Instant,
    warned: [bool; 3],
    on_warn: Option<Box<dyn FnMut(BudgetWarning) + Send>>,
}

impl BudgetController {
    /// Create a controller for the given budget, with no warning handler.
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            usage: Usage::default(),
            started_at: Instant::now(),
            warned: [false; 3],
            on_warn: None,
        }
    }

    /// Attach a warning handler. Absence of a handler is not an error;
    /// warnings are simply dropped and not otherwise recorded.
    pub fn with_warning_handler(mut self, handler: impl FnMut(BudgetWarning) + Send + 'static) -> Self {
        self.on_warn = Some(Box::new(handler));
        self
    }

    /// The configured budget this controller was constructed with.
    pub fn budget(&self) -> Budget {
        self.budget
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Whether an operation of `kind` may proceed given current usage.
    ///
    /// Depth is checked only for subcalls; iteration count only for
    /// iterations. May fire an 80% warning as a side effect.
    pub fn can_proceed(&mut self, kind: CheckKind) -> bool {
        self.maybe_warn();

        let elapsed = self.elapsed_ms();
        let within_cost = self.usage.total_cost < self.budget.max_cost;
        let within_tokens = self.usage.total_tokens < self.budget.max_tokens;
        let within_time = elapsed < self.budget.max_time_ms;

        if !(within_cost && within_tokens && within_time) {
            return false;
        }

        match kind {
            CheckKind::Iteration => self.usage.iterations < self.budget.max_iterations,
            CheckKind::Subcall(depth) => depth < self.budget.max_depth,
        }
    }

    fn maybe_warn(&mut self) {
        let elapsed = self.elapsed_ms();
        let checks = [
            (
                WarnDimension::Cost,
                self.usage.total_cost / self.budget.max_cost.max(f64::EPSILON),
            ),
            (
                WarnDimension::Tokens,
                self.usage.total_tokens as f64 / self.budget.max_tokens.max(1) as f64,
            ),
            (
                WarnDimension::Time,
                elapsed as f64 / self.budget.max_time_ms.max(1) as f64,
            ),
        ];

        for (idx, (dim, ratio)) in checks.into_iter().enumerate() {
            if ratio >= 0.8 && !self.warned[idx] {
                self.warned[idx] = true;
                if let Some(handler) = self.on_warn.as_mut() {
                    let pct = (ratio * 100.0).min(999.0);
                    let message = match dim {
                        WarnDimension::Cost => {
                            format!("cost budget at {:.0}% of cap", pct)
                        }
                        WarnDimension::Tokens => {
                            format!("token budget at {:.0}% of cap", pct)
                        }
                        WarnDimension::Time => {
                            format!("time budget at {:.0}% of cap", pct)
                        }
                    };
                    handler(BudgetWarning { dimension: dim, message });
                }
            }
        }
    }

    /// Add usage deltas and refresh duration.
    pub fn record(&mut self, delta: RecordDelta) {
        if let Some(cost) = delta.cost {
            self.usage.total_cost += cost;
        }
        if let Some(input) = delta.input_tokens {
            self.usage.input_tokens += input;
            self.usage.total_tokens += input;
        }
        if let Some(output) = delta.output_tokens {
            self.usage.output_tokens += output;
            self.usage.total_tokens += output;
        }
        if delta.iteration {
            self.usage.iterations += 1;
        }
        if delta.subcall {
            self.usage.subcalls += 1;
        }
        if let Some(depth) = delta.depth {
            self.usage.max_depth_reached = self.usage.max_depth_reached.max(depth);
        }
        self.usage.duration_ms = self.elapsed_ms();
    }

    /// Derive the budget to hand to a child executor spawned at `parent_depth`.
    pub fn get_sub_budget(&self, parent_depth: u32) -> PartialBudget {
        let remaining = self.get_remaining();
        PartialBudget {
            max_cost: Some(remaining.cost * 0.5),
            max_tokens: Some((remaining.tokens as f64 * 0.5) as u64),
            max_time_ms: Some((remaining.time_ms as f64 * 0.5) as u64),
            max_depth: Some(self.budget.max_depth.saturating_sub(parent_depth + 1)),
            max_iterations: Some(
                ((self.budget.max_iterations as f64) * 0.5).ceil() as u32
            ),
        }
    }

    /// A defensive snapshot of current usage, with duration refreshed.
    pub fn get_usage(&mut self) -> Usage {
        self.usage.duration_ms = self.elapsed_ms();
        self.usage.clone()
    }

    /// Remaining headroom per dimension. Negative differences clamp to 0.
    pub fn get_remaining(&self) -> Remaining {
        let elapsed = self.elapsed_ms();
        Remaining {
            cost: (self.budget.max_cost - self.usage.total_cost).max(0.0),
            tokens: self.budget.max_tokens.saturating_sub(self.usage.total_tokens),
            time_ms: self.budget.max_time_ms.saturating_sub(elapsed),
            depth: self.budget.max_depth,
            iterations: self.budget.max_iterations.saturating_sub(self.usage.iterations),
        }
    }

    /// The first exhausted dimension, in cost/tokens/time/iterations order,
    /// or `None` if nothing is exhausted.
    pub fn get_block_reason(&self) -> Option<&'static str> {
        let elapsed = self.elapsed_ms();
        if self.usage.total_cost >= self.budget.max_cost {
            return Some("cost");
        }
        if self.usage.total_tokens >= self.budget.max_tokens {
            return Some("tokens");
        }
        if elapsed >= self.budget.max_time_ms {
            return Some("time");
        }
        if self.usage.iterations >= self.budget.max_iterations {
            return Some("iterations");
        }
        None
    }

    /// Wall-clock elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_matches_spec() {
        let b = Budget::default();
        assert_eq!(b.max_cost, 5.0);
        assert_eq!(b.max_tokens, 500_000);
        assert_eq!(b.max_time_ms, 300_000);
        assert_eq!(b.max_depth, 2);
        assert_eq!(b.max_iterations, 30);
    }

    #[test]
    fn partial_budget_merges_with_later_winning() {
        let base = Budget::default();
        let over = PartialBudget {
            max_iterations: Some(3),
            ..Default::default()
        };
        let merged = over.merge_over(base);
        assert_eq!(merged.max_iterations, 3);
        assert_eq!(merged.max_cost, base.max_cost);
    }

    #[test]
    fn can_proceed_iteration_ignores_depth() {
        let mut ctrl = BudgetController::new(Budget {
            max_depth: 0,
            ..Default::default()
        });
        assert!(ctrl.can_proceed(CheckKind::Iteration));
    }

    #[test]
    fn can_proceed_subcall_respects_depth_cap() {
        let mut ctrl = BudgetController::new(Budget {
            max_depth: 1,
            ..Default::default()
        });
        assert!(!ctrl.can_proceed(CheckKind::Subcall(1)));
        assert!(ctrl.can_proceed(CheckKind::Subcall(0)));
    }

    #[test]
    fn record_accumulates_tokens_and_satisfies_p1() {
        let mut ctrl = BudgetController::new(Budget::default());
        ctrl.record(RecordDelta {
            input_tokens: Some(100),
            output_tokens: Some(50),
            ..Default::default()
        });
        let usage = ctrl.get_usage();
        assert_eq!(usage.total_tokens, usage.input_tokens + usage.output_tokens);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn record_depth_is_monotonic_non_decreasing() {
        let mut ctrl = BudgetController::new(Budget::default());
        ctrl.record(RecordDelta {
            depth: Some(2),
            ..Default::default()
        });
        ctrl.record(RecordDelta {
            depth: Some(1),
            ..Default::default()
        });
        assert_eq!(ctrl.get_usage().max_depth_reached, 2);
    }

    #[test]
    fn sub_budget_depth_matches_p6() {
        let ctrl = BudgetController::new(Budget {
            max_depth: 5,
            ..Default::default()
        });
        let sub = ctrl.get_sub_budget(2);
        assert_eq!(sub.max_depth, Some(2)); // max(0, 5 - 2 - 1)
    }

    #[test]
    fn sub_budget_depth_clamps_at_zero() {
        let ctrl = BudgetController::new(Budget {
            max_depth: 1,
            ..Default::default()
        });
        let sub = ctrl.get_sub_budget(1);
        assert_eq!(sub.max_depth, Some(0));
    }

    #[test]
    fn sub_budget_iterations_based_on_original_not_remaining() {
        let mut ctrl = BudgetController::new(Budget {
            max_iterations: 7,
            ..Default::default()
        });
        ctrl.record(RecordDelta {
            iteration: true,
            ..Default::default()
        });
        let sub = ctrl.get_sub_budget(0);
        assert_eq!(sub.max_iterations, Some(4)); // ceil(7 * 0.5)
    }

    #[test]
    fn warning_fires_at_most_once_per_dimension() {
        use std::sync::{Arc, Mutex};
        let fired: Arc<Mutex<Vec<WarnDimension>>> = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let mut ctrl = BudgetController::new(Budget {
            max_tokens: 100,
            ..Default::default()
        })
        .with_warning_handler(move |w| fired_clone.lock().unwrap().push(w.dimension));

        for _ in 0..5 {
            ctrl.record(RecordDelta {
                input_tokens: Some(20),
                ..Default::default()
            });
            ctrl.can_proceed(CheckKind::Iteration);
        }

        let fired = fired.lock().unwrap();
        let tokens_warnings = fired.iter().filter(|d| **d == WarnDimension::Tokens).count();
        assert_eq!(tokens_warnings, 1);
    }

    #[test]
    fn block_reason_reports_first_exhausted_dimension() {
        let mut ctrl = BudgetController::new(Budget {
            max_cost: 1.0,
            max_tokens: 10,
            ..Default::default()
        });
        assert_eq!(ctrl.get_block_reason(), None);
        ctrl.record(RecordDelta {
            cost: Some(1.0),
            ..Default::default()
        });
        assert_eq!(ctrl.get_block_reason(), Some("cost"));
    }

    #[test]
    fn get_usage_is_idempotent_snapshot() {
        let mut ctrl = BudgetController::new(Budget::default());
        ctrl.record(RecordDelta {
            input_tokens: Some(10),
            ..Default::default()
        });
        let a = ctrl.get_usage();
        let b = ctrl.get_usage();
        assert_eq!(a.total_tokens, b.total_tokens);
        assert_eq!(a.iterations, b.iterations);
    }
}
