//! Deterministic depth-first branch-and-bound over binary variables.
//!
//! Each constraint keeps an activity interval: the least and greatest value
//! its expression can still reach given the current partial assignment.
//! Propagation fixes any variable whose alternative would empty a row's
//! interval; search branches on the lowest-index free variable, value 1
//! first. Fixed branching order makes the solver reproducible: the same
//! model always yields the same feasible point.

use super::{MilpSolver, Model, SolveOutcome};
use anyhow::{bail, Result};
use std::time::{Duration, Instant};

/// Constraint with the expression constant folded into the bounds.
struct Row {
    terms: Vec<(usize, i64)>,
    lo: i64,
    hi: i64,
}

#[derive(Debug, Default)]
pub struct BranchBoundSolver;

impl BranchBoundSolver {
    pub fn new() -> Self {
        Self
    }
}

impl MilpSolver for BranchBoundSolver {
    fn solve(&self, model: &Model, time_limit: Duration) -> Result<SolveOutcome> {
        let deadline = Instant::now() + time_limit;

        let mut rows = Vec::with_capacity(model.num_constraints());
        for constraint in model.constraints() {
            for &(var, _) in constraint.expr.terms() {
                if var.0 >= model.num_vars() {
                    bail!("constraint references unknown variable {}", var.0);
                }
            }
            rows.push(Row {
                terms: constraint.expr.terms().iter().map(|&(v, a)| (v.0, a)).collect(),
                lo: constraint.lo.saturating_sub(constraint.expr.constant()),
                hi: constraint.hi.saturating_sub(constraint.expr.constant()),
            });
        }

        let values = model.fixed_values().to_vec();
        Ok(match search(&rows, values, deadline) {
            Search::Found(point) => SolveOutcome::Feasible(point),
            Search::Exhausted => SolveOutcome::Infeasible,
            Search::TimedOut => SolveOutcome::TimeLimit,
        })
    }
}

enum Search {
    Found(Vec<bool>),
    Exhausted,
    TimedOut,
}

fn search(rows: &[Row], mut values: Vec<Option<bool>>, deadline: Instant) -> Search {
    if Instant::now() >= deadline {
        return Search::TimedOut;
    }
    if !propagate(rows, &mut values) {
        return Search::Exhausted;
    }
    let branch_var = match values.iter().position(|v| v.is_none()) {
        None => return Search::Found(values.iter().map(|v| v.unwrap_or(false)).collect()),
        Some(i) => i,
    };
    for candidate in [true, false] {
        let mut child = values.clone();
        child[branch_var] = Some(candidate);
        match search(rows, child, deadline) {
            Search::Found(point) => return Search::Found(point),
            Search::TimedOut => return Search::TimedOut,
            Search::Exhausted => {}
        }
    }
    Search::Exhausted
}

/// Fix all forced variables; `false` on conflict.
fn propagate(rows: &[Row], values: &mut [Option<bool>]) -> bool {
    loop {
        let mut changed = false;
        for row in rows {
            let mut lo_act: i64 = 0;
            let mut hi_act: i64 = 0;
            for &(var, coef) in &row.terms {
                match values[var] {
                    Some(true) => {
                        lo_act += coef;
                        hi_act += coef;
                    }
                    Some(false) => {}
                    None => {
                        if coef > 0 {
                            hi_act += coef;
                        } else {
                            lo_act += coef;
                        }
                    }
                }
            }
            if lo_act > row.hi || hi_act < row.lo {
                return false;
            }
            for &(var, coef) in &row.terms {
                if values[var].is_some() {
                    continue;
                }
                // Activity interval if this variable were set to 1 / to 0.
                let (lo1, hi1) = if coef > 0 {
                    (lo_act + coef, hi_act)
                } else {
                    (lo_act, hi_act + coef)
                };
                let (lo0, hi0) = if coef > 0 {
                    (lo_act, hi_act - coef)
                } else {
                    (lo_act - coef, hi_act)
                };
                let feasible1 = lo1 <= row.hi && hi1 >= row.lo;
                let feasible0 = lo0 <= row.hi && hi0 >= row.lo;
                match (feasible0, feasible1) {
                    (false, false) => return false,
                    (false, true) => {
                        values[var] = Some(true);
                        changed = true;
                    }
                    (true, false) => {
                        values[var] = Some(false);
                        changed = true;
                    }
                    (true, true) => continue,
                }
                // Activities are stale after a fix; rescan this row on the
                // next outer pass.
                break;
            }
        }
        if !changed {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{LinExpr, VarId};

    const MINUTE: Duration = Duration::from_secs(60);

    fn sum(vars: &[VarId]) -> LinExpr {
        let mut expr = LinExpr::new();
        for &v in vars {
            expr.add_term(v, 1);
        }
        expr
    }

    #[test]
    fn empty_model_is_feasible() {
        let model = Model::new();
        let outcome = BranchBoundSolver::new().solve(&model, MINUTE).unwrap();
        assert!(matches!(outcome, SolveOutcome::Feasible(_)));
    }

    #[test]
    fn exactly_one_respects_fixed_values() {
        let mut model = Model::new();
        let a = model.add_var("a");
        let b = model.add_var("b");
        model.add_eq(sum(&[a, b]), 1);
        model.fix(a, true);

        let outcome = BranchBoundSolver::new().solve(&model, MINUTE).unwrap();
        match outcome {
            SolveOutcome::Feasible(point) => {
                assert!(point[a.index()]);
                assert!(!point[b.index()]);
            }
            other => panic!("expected feasible, got {:?}", other),
        }
    }

    #[test]
    fn infeasible_sum() {
        let mut model = Model::new();
        let a = model.add_var("a");
        let b = model.add_var("b");
        model.add_ge(sum(&[a, b]), 3);

        let outcome = BranchBoundSolver::new().solve(&model, MINUTE).unwrap();
        assert!(matches!(outcome, SolveOutcome::Infeasible));
    }

    #[test]
    fn weighted_row_with_negative_coefficients() {
        // 5a - 3b = 2 forces a=1, b=1.
        let mut model = Model::new();
        let a = model.add_var("a");
        let b = model.add_var("b");
        let mut expr = LinExpr::new();
        expr.add_term(a, 5);
        expr.add_term(b, -3);
        model.add_eq(expr, 2);

        match BranchBoundSolver::new().solve(&model, MINUTE).unwrap() {
            SolveOutcome::Feasible(point) => {
                assert!(point[a.index()]);
                assert!(point[b.index()]);
            }
            other => panic!("expected feasible, got {:?}", other),
        }
    }

    #[test]
    fn constant_folds_into_bounds() {
        // a + 10 ≤ 10 forces a = 0.
        let mut model = Model::new();
        let a = model.add_var("a");
        let mut expr = LinExpr::new();
        expr.add_term(a, 1);
        expr.add_constant(10);
        model.add_le(expr, 10);

        match BranchBoundSolver::new().solve(&model, MINUTE).unwrap() {
            SolveOutcome::Feasible(point) => assert!(!point[a.index()]),
            other => panic!("expected feasible, got {:?}", other),
        }
    }

    #[test]
    fn no_good_cuts_enumerate_all_points() {
        // Exactly-one over three variables has three feasible points;
        // excluding each found point must walk through all of them.
        let mut model = Model::new();
        let vars: Vec<VarId> = (0..3).map(|i| model.add_var(format!("v{}", i))).collect();
        model.add_eq(sum(&vars), 1);

        let solver = BranchBoundSolver::new();
        let mut found = Vec::new();
        loop {
            match solver.solve(&model, MINUTE).unwrap() {
                SolveOutcome::Feasible(point) => {
                    let mut cut = LinExpr::new();
                    let mut ones = 0i64;
                    for &v in &vars {
                        if point[v.index()] {
                            cut.add_term(v, -1);
                            ones += 1;
                        } else {
                            cut.add_term(v, 1);
                        }
                    }
                    model.add_ge(cut, 1 - ones);
                    found.push(point);
                }
                SolveOutcome::Infeasible => break,
                SolveOutcome::TimeLimit => panic!("unexpected time limit"),
            }
        }
        assert_eq!(found.len(), 3);
        for (i, point) in found.iter().enumerate() {
            for (j, other) in found.iter().enumerate() {
                if i != j {
                    assert_ne!(point, other);
                }
            }
        }
    }

    #[test]
    fn expired_deadline_reports_time_limit() {
        let mut model = Model::new();
        let a = model.add_var("a");
        model.add_eq(sum(&[a]), 1);

        let outcome = BranchBoundSolver::new()
            .solve(&model, Duration::ZERO)
            .unwrap();
        assert!(matches!(outcome, SolveOutcome::TimeLimit));
    }

    #[test]
    fn deterministic_across_runs() {
        let mut model = Model::new();
        let vars: Vec<VarId> = (0..6).map(|i| model.add_var(format!("v{}", i))).collect();
        model.add_eq(sum(&vars), 2);

        let solver = BranchBoundSolver::new();
        let first = solver.solve(&model, MINUTE).unwrap();
        let second = solver.solve(&model, MINUTE).unwrap();
        match (first, second) {
            (SolveOutcome::Feasible(a), SolveOutcome::Feasible(b)) => assert_eq!(a, b),
            _ => panic!("expected feasible twice"),
        }
    }
}
