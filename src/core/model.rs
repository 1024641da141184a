//! ILP formulation of the residual assignment problem.
//!
//! Everything the preprocessor could not lock becomes a reduced 0-1 model:
//! `x[i,p]` assigns unassigned input `i` to participant slot `p`, `c[p,j]`
//! assigns unassigned change `j`, and — unless the preprocessor already
//! deduced the taker — `t[p]` marks the taker slot. Greedy locks enter as
//! fixed variables, so no-good cuts can never contradict them.
//!
//! Symmetry breaking orders the free participant slots by the smallest
//! input they own, via auxiliary `first[i,p]` bits. Every partition of the
//! remaining inputs therefore has exactly one feasible labeling, and the
//! enumeration cut only needs to exclude the solver's literal valuation.

use crate::config::AnalyzerConfig;
use crate::core::greedy::GreedyAssignment;
use crate::core::solution::Solution;
use crate::core::types::CoinJoinTx;
use crate::solver::{LinExpr, Model, VarId};

pub struct ReducedProblem {
    pub model: Model,
    /// Original input indices, ascending.
    inputs: Vec<usize>,
    /// Positions in `tx.change_outputs()`, ascending.
    changes: Vec<usize>,
    /// Original participant slots, ascending.
    participants: Vec<usize>,
    x: Vec<Vec<VarId>>,
    c: Vec<Vec<VarId>>,
    t: Option<Vec<VarId>>,
}

impl ReducedProblem {
    pub fn build(tx: &CoinJoinTx, config: &AnalyzerConfig, greedy: &GreedyAssignment) -> Self {
        let inputs: Vec<usize> = greedy.unassigned_inputs.iter().copied().collect();
        let changes: Vec<usize> = greedy.unassigned_changes.iter().copied().collect();
        let participants: Vec<usize> = greedy.unassigned_participants.iter().copied().collect();
        let (ni, nc, np) = (inputs.len(), changes.len(), participants.len());

        let equal = tx.equal_amount() as i64;
        let network_fee = tx.network_fee() as i64;
        let max_maker_fee = config.max_fee_abs(tx.equal_amount()) as i64;
        let big_m = tx.total_input() as i64 + 1;

        let mut model = Model::new();

        let x: Vec<Vec<VarId>> = (0..ni)
            .map(|i| {
                (0..np)
                    .map(|p| model.add_var(format!("x_{}_{}", inputs[i], participants[p])))
                    .collect()
            })
            .collect();
        let c: Vec<Vec<VarId>> = (0..np)
            .map(|p| {
                (0..nc)
                    .map(|j| {
                        model.add_var(format!(
                            "c_{}_{}",
                            participants[p],
                            tx.change_outputs()[changes[j]].index
                        ))
                    })
                    .collect()
            })
            .collect();
        let t: Option<Vec<VarId>> = greedy.taker.is_none().then(|| {
            (0..np)
                .map(|p| model.add_var(format!("t_{}", participants[p])))
                .collect()
        });

        // Each unassigned input belongs to exactly one free slot.
        for i in 0..ni {
            let mut expr = LinExpr::new();
            for p in 0..np {
                expr.add_term(x[i][p], 1);
            }
            model.add_eq(expr, 1);
        }

        // Each unassigned change is owned exactly once; dust can never be
        // change.
        for j in 0..nc {
            let mut expr = LinExpr::new();
            for p in 0..np {
                expr.add_term(c[p][j], 1);
            }
            model.add_eq(expr, 1);
            if tx.change_outputs()[changes[j]].amount < config.dust_threshold {
                for p in 0..np {
                    model.fix(c[p][j], false);
                }
            }
        }

        // Slot validity: at least one input, at most one change.
        for p in 0..np {
            let mut owns = LinExpr::new();
            for i in 0..ni {
                owns.add_term(x[i][p], 1);
            }
            model.add_ge(owns, 1);

            let mut has_change = LinExpr::new();
            for j in 0..nc {
                has_change.add_term(c[p][j], 1);
            }
            model.add_le(has_change, 1);
        }

        if let Some(t) = &t {
            let mut expr = LinExpr::new();
            for p in 0..np {
                expr.add_term(t[p], 1);
            }
            model.add_eq(expr, 1);
        }

        // fee_p = Σ x·input − Σ c·change − equal, as an expression.
        let balance = |p: usize| {
            let mut expr = LinExpr::new();
            for i in 0..ni {
                expr.add_term(x[i][p], tx.inputs()[inputs[i]].amount as i64);
            }
            for j in 0..nc {
                expr.add_term(c[p][j], -(tx.change_outputs()[changes[j]].amount as i64));
            }
            expr.add_constant(-equal);
            expr
        };

        // Fees the taker still has to cover beyond the network fee: what
        // the locked makers already earn plus the ceiling for the free
        // maker slots.
        let locked_maker_fees: i64 = greedy
            .change_of
            .keys()
            .filter(|&&slot| greedy.taker != Some(slot))
            .map(|&slot| greedy.locked_fee(tx, slot).unsigned_abs() as i64)
            .sum();
        let taker_budget = locked_maker_fees + max_maker_fee * (np as i64 - 1).max(0);

        for p in 0..np {
            match &t {
                Some(t) => {
                    // Maker bounds, lifted by big-M when this slot is the
                    // taker; taker bounds, lifted when it is not.
                    let mut upper = balance(p);
                    upper.add_term(t[p], -big_m);
                    model.add_le(upper, 0);

                    let mut lower = balance(p);
                    lower.add_term(t[p], big_m);
                    model.add_ge(lower, -max_maker_fee);

                    let mut taker_lower = balance(p);
                    taker_lower.add_term(t[p], -big_m);
                    model.add_ge(taker_lower, network_fee - big_m);

                    let mut taker_upper = balance(p);
                    taker_upper.add_term(t[p], big_m);
                    model.add_le(taker_upper, network_fee + taker_budget + big_m);
                }
                None => {
                    // Taker already locked: every free slot is a maker.
                    model.add_range(balance(p), -max_maker_fee, 0);
                }
            }
        }

        // Redundant global balance over the free slots.
        if np > 0 {
            let locked_fees: i64 = greedy
                .change_of
                .keys()
                .map(|&slot| greedy.locked_fee(tx, slot))
                .sum();
            let mut global = LinExpr::new();
            for p in 0..np {
                let expr = balance(p);
                for &(var, coef) in expr.terms() {
                    global.add_term(var, coef);
                }
                global.add_constant(expr.constant());
            }
            model.add_eq(global, network_fee - locked_fees);
        }

        // Lexicographic symmetry breaking: slot order follows the smallest
        // owned input.
        if np >= 2 {
            let first: Vec<Vec<VarId>> = (0..ni)
                .map(|i| {
                    (0..np)
                        .map(|p| model.add_var(format!("first_{}_{}", inputs[i], participants[p])))
                        .collect()
                })
                .collect();
            for p in 0..np {
                let mut one = LinExpr::new();
                for i in 0..ni {
                    one.add_term(first[i][p], 1);

                    let mut le = LinExpr::new();
                    le.add_term(first[i][p], 1);
                    le.add_term(x[i][p], -1);
                    model.add_le(le, 0);

                    let mut ge = LinExpr::new();
                    ge.add_term(first[i][p], 1);
                    ge.add_term(x[i][p], -1);
                    for smaller in 0..i {
                        ge.add_term(x[smaller][p], 1);
                    }
                    model.add_ge(ge, 0);
                }
                model.add_eq(one, 1);
            }
            for p in 0..np - 1 {
                let mut order = LinExpr::new();
                for i in 0..ni {
                    order.add_term(first[i][p], i as i64);
                    order.add_term(first[i][p + 1], -(i as i64));
                }
                model.add_le(order, -1);
            }
        }

        Self {
            model,
            inputs,
            changes,
            participants,
            x,
            c,
            t,
        }
    }

    fn assignment_vars(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = self.x.iter().flatten().copied().collect();
        vars.extend(self.c.iter().flatten().copied());
        if let Some(t) = &self.t {
            vars.extend(t.iter().copied());
        }
        vars
    }

    /// Exclude the solver's literal valuation: at least one assignment
    /// variable must flip. Together with symmetry breaking this bars every
    /// relabeling of the found partition.
    pub fn add_no_good_cut(&mut self, point: &[bool]) {
        let mut cut = LinExpr::new();
        let mut ones = 0i64;
        for var in self.assignment_vars() {
            if point[var.index()] {
                cut.add_term(var, -1);
                ones += 1;
            } else {
                cut.add_term(var, 1);
            }
        }
        self.model.add_ge(cut, 1 - ones);
    }

    /// Merge greedy locks with the solver point into a full solution.
    pub fn extract(
        &self,
        tx: &CoinJoinTx,
        greedy: &GreedyAssignment,
        point: &[bool],
    ) -> Result<Solution, String> {
        let n = tx.num_participants();
        let mut parts: Vec<(Vec<usize>, Option<usize>, bool)> = vec![(Vec::new(), None, false); n];

        for (&input, &slot) in &greedy.input_owner {
            parts[slot].0.push(input);
        }
        for (&slot, &change) in &greedy.change_of {
            parts[slot].1 = change;
        }
        if let Some(taker) = greedy.taker {
            parts[taker].2 = true;
        }

        for (ri, &input) in self.inputs.iter().enumerate() {
            let owner = (0..self.participants.len())
                .find(|&p| point[self.x[ri][p].index()])
                .ok_or_else(|| format!("input {} unassigned in solver answer", input))?;
            parts[self.participants[owner]].0.push(input);
        }
        for (rp, &slot) in self.participants.iter().enumerate() {
            for (rj, &change) in self.changes.iter().enumerate() {
                if point[self.c[rp][rj].index()] {
                    if parts[slot].1.is_some() {
                        return Err(format!("slot {} owns two change outputs", slot));
                    }
                    parts[slot].1 = Some(change);
                }
            }
            if let Some(t) = &self.t {
                if point[t[rp].index()] {
                    if parts.iter().any(|p| p.2) {
                        return Err("more than one taker in solver answer".into());
                    }
                    parts[slot].2 = true;
                }
            }
        }
        if !parts.iter().any(|p| p.2) {
            return Err("no taker in solver answer".into());
        }

        Ok(Solution::assemble(tx, parts))
    }
}
