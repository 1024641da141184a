//! Solution enumeration: solve, emit, cut, repeat until the model runs dry.
//!
//! Each iteration asks the solver for one feasible point, turns it into a
//! canonical [`Solution`], hands it to the observer, and injects a no-good
//! cut so the next solve must differ. The feasible set is finite and
//! shrinks every round, so termination is guaranteed; the cap, the
//! per-solve clock, the cancellation token, and the memory ceiling can all
//! end the loop earlier. Whatever was emitted stays emitted.

use crate::cancel::CancelToken;
use crate::config::AnalyzerConfig;
use crate::core::greedy::{greedy_preprocessing, GreedyAssignment};
use crate::core::model::ReducedProblem;
use crate::core::solution::{Solution, SolutionSignature};
use crate::core::types::CoinJoinTx;
use crate::limits::MemoryMonitor;
use crate::solver::{MilpSolver, SolveOutcome};
use std::collections::HashSet;

/// Consecutive already-seen answers tolerated before the solver backend is
/// declared defective. Symmetry breaking plus cuts make duplicates
/// impossible for a correct backend.
const MAX_DUPLICATE_ANSWERS: usize = 10;

/// Why the loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Model proved infeasible: every distinct solution was found (or none
    /// existed).
    Exhausted,
    /// `max_solutions` reached.
    CapReached,
    /// A solve hit the per-solve wall clock without an answer.
    TimeLimit,
    /// Cancellation token fired.
    Cancelled,
    /// Resident memory crossed the ceiling.
    MemoryLimit { used: u64, limit: u64 },
    /// The backend failed or returned a constraint-violating answer.
    SolverFailure(String),
}

impl StopReason {
    pub fn exit_code(&self, solutions_found: usize) -> i32 {
        match self {
            StopReason::Cancelled => 2,
            StopReason::SolverFailure(_) => 4,
            StopReason::MemoryLimit { .. } => 5,
            StopReason::Exhausted | StopReason::CapReached | StopReason::TimeLimit => {
                if solutions_found > 0 {
                    0
                } else {
                    1
                }
            }
        }
    }
}

/// Injected progress/emission sink. Emission failures are logged, not
/// fatal: losing an incremental write must not lose the enumeration.
pub trait EnumerationObserver {
    fn on_iteration(&mut self, _iteration: usize) {}

    /// Called once per accepted solution; `index` is 1-based.
    fn on_solution(&mut self, _index: usize, _solution: &Solution) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct NullObserver;

impl EnumerationObserver for NullObserver {}

#[derive(Debug)]
pub struct Enumeration {
    pub solutions: Vec<Solution>,
    pub stop: StopReason,
    /// Number of solver invocations.
    pub iterations: usize,
}

pub fn enumerate_solutions(
    tx: &CoinJoinTx,
    config: &AnalyzerConfig,
    solver: &dyn MilpSolver,
    cancel: &CancelToken,
    observer: &mut dyn EnumerationObserver,
) -> Enumeration {
    let greedy = greedy_preprocessing(tx, config);

    if greedy.is_complete() {
        return complete_from_greedy(tx, config, &greedy, observer);
    }

    let memory = MemoryMonitor::new(config.memory_limit_bytes);
    let mut problem = ReducedProblem::build(tx, config, &greedy);
    tracing::info!(
        vars = problem.model.num_vars(),
        constraints = problem.model.num_constraints(),
        "reduced model built"
    );

    let mut solutions: Vec<Solution> = Vec::new();
    let mut seen: HashSet<SolutionSignature> = HashSet::new();
    let mut duplicates = 0usize;
    let mut iterations = 0usize;

    let stop = loop {
        if solutions.len() >= config.max_solutions {
            break StopReason::CapReached;
        }
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if let Some(used) = memory.exceeded() {
            break StopReason::MemoryLimit {
                used,
                limit: memory.limit_bytes(),
            };
        }

        iterations += 1;
        observer.on_iteration(iterations);

        let point = match solver.solve(&problem.model, config.per_solve_timeout) {
            Err(err) => break StopReason::SolverFailure(err.to_string()),
            Ok(SolveOutcome::Infeasible) => break StopReason::Exhausted,
            Ok(SolveOutcome::TimeLimit) => break StopReason::TimeLimit,
            Ok(SolveOutcome::Feasible(point)) => point,
        };

        let solution = match problem.extract(tx, &greedy, &point) {
            Ok(solution) => solution,
            Err(msg) => break StopReason::SolverFailure(msg),
        };
        if let Err(msg) = solution.validate(tx, config) {
            break StopReason::SolverFailure(format!("constraint-violating answer: {}", msg));
        }

        if !seen.insert(solution.signature()) {
            duplicates += 1;
            tracing::warn!(iteration = iterations, "solver repeated an excluded answer");
            if duplicates >= MAX_DUPLICATE_ANSWERS {
                break StopReason::SolverFailure(format!(
                    "{} duplicate answers in a row",
                    duplicates
                ));
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            problem.add_no_good_cut(&point);
            continue;
        }
        duplicates = 0;

        solutions.push(solution);
        let index = solutions.len();
        if let Err(err) = observer.on_solution(index, &solutions[index - 1]) {
            tracing::warn!("observer failed on solution {}: {:#}", index, err);
        }

        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        problem.add_no_good_cut(&point);
    };

    tracing::info!(
        solutions = solutions.len(),
        iterations,
        stop = ?stop,
        "enumeration finished"
    );
    Enumeration {
        solutions,
        stop,
        iterations,
    }
}

/// The preprocessor pinned every input: exactly one assignment exists and
/// no solver call is needed. Without a locked taker, the taker is the slot
/// with the largest fee — the only one that can cover the network fee.
fn complete_from_greedy(
    tx: &CoinJoinTx,
    config: &AnalyzerConfig,
    greedy: &GreedyAssignment,
    observer: &mut dyn EnumerationObserver,
) -> Enumeration {
    let n = tx.num_participants();
    let taker = greedy.taker.unwrap_or_else(|| {
        (0..n)
            .max_by_key(|&slot| greedy.locked_fee(tx, slot))
            .unwrap_or(0)
    });

    let parts: Vec<(Vec<usize>, Option<usize>, bool)> = (0..n)
        .map(|slot| {
            (
                greedy.inputs_of(slot),
                greedy.change_of.get(&slot).copied().flatten(),
                slot == taker,
            )
        })
        .collect();
    let solution = Solution::assemble(tx, parts);

    if let Err(msg) = solution.validate(tx, config) {
        tracing::error!("fully-locked preprocessor assignment is invalid: {}", msg);
        return Enumeration {
            solutions: Vec::new(),
            stop: StopReason::SolverFailure(format!("invalid deterministic assignment: {}", msg)),
            iterations: 0,
        };
    }

    tracing::info!("assignment fully determined by preprocessing");
    if let Err(err) = observer.on_solution(1, &solution) {
        tracing::warn!("observer failed on solution 1: {:#}", err);
    }
    Enumeration {
        solutions: vec![solution],
        stop: StopReason::Exhausted,
        iterations: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::BranchBoundSolver;
    use std::time::Duration;

    fn symmetric_tx() -> CoinJoinTx {
        CoinJoinTx::from_amounts(
            "symmetric",
            &[150_000, 150_200, 200_000, 300_000, 125_000],
            &[
                100_000, 100_000, 100_000, 100_000, 100_000, 50_500, 50_800, 100_300, 200_400,
                21_000,
            ],
        )
        .unwrap()
    }

    #[test]
    fn deterministic_transaction_skips_the_solver() {
        let tx = CoinJoinTx::from_amounts(
            "deterministic",
            &[150_000, 200_000, 130_000],
            &[100_000, 100_000, 100_000, 50_300, 100_400, 28_300],
        )
        .unwrap();
        let result = enumerate_solutions(
            &tx,
            &AnalyzerConfig::default(),
            &BranchBoundSolver::new(),
            &CancelToken::new(),
            &mut NullObserver,
        );
        assert_eq!(result.iterations, 0);
        assert_eq!(result.stop, StopReason::Exhausted);
        assert_eq!(result.solutions.len(), 1);
        assert_eq!(result.solutions[0].taker_index, 2);
    }

    #[test]
    fn cap_of_one_stops_after_first_solution() {
        let mut cfg = AnalyzerConfig::default();
        cfg.max_solutions = 1;
        let result = enumerate_solutions(
            &symmetric_tx(),
            &cfg,
            &BranchBoundSolver::new(),
            &CancelToken::new(),
            &mut NullObserver,
        );
        assert_eq!(result.stop, StopReason::CapReached);
        assert_eq!(result.solutions.len(), 1);
    }

    #[test]
    fn pre_cancelled_token_stops_before_solving() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = enumerate_solutions(
            &symmetric_tx(),
            &AnalyzerConfig::default(),
            &BranchBoundSolver::new(),
            &cancel,
            &mut NullObserver,
        );
        assert_eq!(result.stop, StopReason::Cancelled);
        assert!(result.solutions.is_empty());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn expired_clock_reports_time_limit() {
        let mut cfg = AnalyzerConfig::default();
        cfg.per_solve_timeout = Duration::from_nanos(1);
        let result = enumerate_solutions(
            &symmetric_tx(),
            &cfg,
            &BranchBoundSolver::new(),
            &CancelToken::new(),
            &mut NullObserver,
        );
        assert_eq!(result.stop, StopReason::TimeLimit);
        assert!(result.solutions.is_empty());
        assert_eq!(result.stop.exit_code(0), 1);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn memory_ceiling_stops_the_loop() {
        let mut cfg = AnalyzerConfig::default();
        cfg.memory_limit_bytes = 1;
        let result = enumerate_solutions(
            &symmetric_tx(),
            &cfg,
            &BranchBoundSolver::new(),
            &CancelToken::new(),
            &mut NullObserver,
        );
        assert!(matches!(result.stop, StopReason::MemoryLimit { .. }));
        assert_eq!(result.stop.exit_code(0), 5);
    }

    #[test]
    fn exit_codes_track_solution_count() {
        assert_eq!(StopReason::Exhausted.exit_code(2), 0);
        assert_eq!(StopReason::Exhausted.exit_code(0), 1);
        assert_eq!(StopReason::CapReached.exit_code(1), 0);
        assert_eq!(StopReason::Cancelled.exit_code(1), 2);
        assert_eq!(StopReason::SolverFailure("x".into()).exit_code(3), 4);
        assert_eq!(
            StopReason::MemoryLimit { used: 2, limit: 1 }.exit_code(9),
            5
        );
    }
}
