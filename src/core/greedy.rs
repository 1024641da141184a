//! Greedy preprocessor: lock unequivocal input↔change pairings.
//!
//! Before the ILP runs, a deterministic pass fixes every pairing the fee
//! model admits only one way. A lock is taken only when it is
//! bidirectionally unique — the input fits exactly one change in one role,
//! and that change fits no other unassigned input in the same role — and
//! when the input is not simultaneously plausible in the other role. Locks
//! therefore never exclude an assignment the model constraints would
//! accept, and the taker is only ever locked by deduction, never by guess.
//!
//! Locked pairings enter the ILP as fixed variables; whatever remains
//! unassigned is the solver's search space.

use crate::config::AnalyzerConfig;
use crate::core::types::CoinJoinTx;
use std::collections::{BTreeMap, BTreeSet};

/// Partial assignment produced by preprocessing.
///
/// Participant slots are allocated in lock order. Change values are
/// positions in `tx.change_outputs()`, not on-chain output indices;
/// `None` marks a slot locked without change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GreedyAssignment {
    /// input index → participant slot
    pub input_owner: BTreeMap<usize, usize>,
    /// participant slot → change position (`None` = locked no-change)
    pub change_of: BTreeMap<usize, Option<usize>>,
    /// Participant slot deduced to be the taker, if any.
    pub taker: Option<usize>,
    pub unassigned_inputs: BTreeSet<usize>,
    pub unassigned_changes: BTreeSet<usize>,
    pub unassigned_participants: BTreeSet<usize>,
}

impl GreedyAssignment {
    /// True when every input is locked and the ILP has nothing left to do.
    pub fn is_complete(&self) -> bool {
        self.unassigned_inputs.is_empty()
    }

    pub fn inputs_of(&self, participant: usize) -> Vec<usize> {
        self.input_owner
            .iter()
            .filter(|&(_, &p)| p == participant)
            .map(|(&i, _)| i)
            .collect()
    }

    /// Signed fee (contributed − received) of a locked slot.
    pub fn locked_fee(&self, tx: &CoinJoinTx, participant: usize) -> i64 {
        let contributed: i64 = self
            .inputs_of(participant)
            .iter()
            .map(|&i| tx.inputs()[i].amount as i64)
            .sum();
        let change: i64 = match self.change_of.get(&participant) {
            Some(Some(pos)) => tx.change_outputs()[*pos].amount as i64,
            _ => 0,
        };
        contributed - tx.equal_amount() as i64 - change
    }
}

pub fn greedy_preprocessing(tx: &CoinJoinTx, config: &AnalyzerConfig) -> GreedyAssignment {
    let n = tx.num_participants();
    let equal = tx.equal_amount() as i64;
    let network_fee = tx.network_fee() as i64;
    let dust = config.dust_threshold;
    let max_maker_fee = config.max_fee_abs(tx.equal_amount()) as i64;
    let max_total_fees = max_maker_fee * (n as i64 - 1);
    let changes = tx.change_outputs();

    // Exactly `n - changes.len()` slots end up without a change output;
    // no-change locks must stay within that budget.
    let no_change_slots = n.saturating_sub(changes.len());

    let mut input_owner: BTreeMap<usize, usize> = BTreeMap::new();
    let mut change_of: BTreeMap<usize, Option<usize>> = BTreeMap::new();
    let mut used_changes: BTreeSet<usize> = BTreeSet::new();
    let mut taker: Option<usize> = None;
    let mut next_participant = 0usize;

    let maker_fee = |input_rem: i64, pos: usize| -> Option<i64> {
        let change = &changes[pos];
        if change.amount < dust {
            return None;
        }
        let fee = change.amount as i64 - input_rem;
        (0..=max_maker_fee).contains(&fee).then_some(fee)
    };
    let taker_fees_via = |input_rem: i64, pos: usize| -> Option<i64> {
        let change = &changes[pos];
        if change.amount < dust {
            return None;
        }
        let paid_to_makers = input_rem - network_fee - change.amount as i64;
        (0..=max_total_fees).contains(&paid_to_makers).then_some(paid_to_makers)
    };
    let no_change_taker_fits =
        |input_rem: i64| (0..=max_total_fees).contains(&(input_rem - network_fee));

    // Pass 1: iterate to a fixed point over bidirectionally unique matches.
    let mut made_progress = true;
    while made_progress && next_participant < n {
        made_progress = false;

        let pool: Vec<usize> = (0..tx.inputs().len())
            .filter(|i| !input_owner.contains_key(i))
            .collect();

        for &i in &pool {
            if next_participant >= n {
                break;
            }
            if input_owner.contains_key(&i) {
                continue;
            }
            let rem = tx.inputs()[i].amount as i64 - equal;
            let others: Vec<usize> = pool
                .iter()
                .copied()
                .filter(|&j| j != i && !input_owner.contains_key(&j))
                .collect();

            let free = |pos: &usize| !used_changes.contains(pos);
            let makers: Vec<(usize, i64)> = (0..changes.len())
                .filter(free)
                .filter_map(|pos| maker_fee(rem, pos).map(|fee| (pos, fee)))
                .collect();
            let takers: Vec<usize> = if taker.is_none() {
                (0..changes.len())
                    .filter(free)
                    .filter(|&pos| taker_fees_via(rem, pos).is_some())
                    .collect()
            } else {
                Vec::new()
            };
            let nc_taker = taker.is_none()
                && change_of.values().filter(|c| c.is_none()).count() < no_change_slots
                && no_change_taker_fits(rem);
            let taker_plausible = !takers.is_empty() || nc_taker;

            if !makers.is_empty() && !taker_plausible {
                // Lock the first change tied to this input alone as maker.
                for &(pos, fee) in &makers {
                    let contested = others.iter().any(|&j| {
                        let other_rem = tx.inputs()[j].amount as i64 - equal;
                        maker_fee(other_rem, pos).is_some()
                    });
                    if contested {
                        continue;
                    }
                    tracing::debug!(
                        input = i,
                        change = changes[pos].index,
                        fee,
                        participant = next_participant,
                        "locked maker"
                    );
                    input_owner.insert(i, next_participant);
                    change_of.insert(next_participant, Some(pos));
                    used_changes.insert(pos);
                    next_participant += 1;
                    made_progress = true;
                    break;
                }
            } else if makers.is_empty() && takers.len() == 1 && !nc_taker {
                let pos = takers[0];
                let contested = others.iter().any(|&j| {
                    let other_rem = tx.inputs()[j].amount as i64 - equal;
                    taker_fees_via(other_rem, pos).is_some()
                });
                if !contested {
                    tracing::debug!(
                        input = i,
                        change = changes[pos].index,
                        participant = next_participant,
                        "locked taker with change"
                    );
                    input_owner.insert(i, next_participant);
                    change_of.insert(next_participant, Some(pos));
                    used_changes.insert(pos);
                    taker = Some(next_participant);
                    next_participant += 1;
                    made_progress = true;
                }
            } else if makers.is_empty() && takers.is_empty() && nc_taker {
                // No other input may be taker-plausible in any form.
                let contested = others.iter().any(|&j| {
                    let other_rem = tx.inputs()[j].amount as i64 - equal;
                    no_change_taker_fits(other_rem)
                        || (0..changes.len())
                            .filter(|pos| !used_changes.contains(pos))
                            .any(|pos| taker_fees_via(other_rem, pos).is_some())
                });
                if !contested {
                    tracing::debug!(
                        input = i,
                        participant = next_participant,
                        "locked no-change taker"
                    );
                    input_owner.insert(i, next_participant);
                    change_of.insert(next_participant, None);
                    taker = Some(next_participant);
                    next_participant += 1;
                    made_progress = true;
                }
            }
        }
    }

    // Pass 2: isolated inputs matching the denomination exactly are
    // no-change makers with fee 0 — the only no-change maker the fee model
    // admits. Anything else stays free for the ILP.
    let remaining: Vec<usize> = (0..tx.inputs().len())
        .filter(|i| !input_owner.contains_key(i))
        .collect();
    for i in remaining {
        if next_participant >= n {
            break;
        }
        let rem = tx.inputs()[i].amount as i64 - equal;
        if rem != 0 {
            continue;
        }
        let has_maker_pairing = (0..changes.len())
            .filter(|pos| !used_changes.contains(pos))
            .any(|pos| maker_fee(rem, pos).is_some());
        let nc_taker_plausible = taker.is_none() && no_change_taker_fits(rem);
        let budget_left =
            change_of.values().filter(|c| c.is_none()).count() < no_change_slots;
        if !has_maker_pairing && !nc_taker_plausible && budget_left {
            tracing::debug!(input = i, participant = next_participant, "locked no-change maker");
            input_owner.insert(i, next_participant);
            change_of.insert(next_participant, None);
            next_participant += 1;
        }
    }

    let unassigned_inputs: BTreeSet<usize> = (0..tx.inputs().len())
        .filter(|i| !input_owner.contains_key(i))
        .collect();
    let unassigned_changes: BTreeSet<usize> = (0..changes.len())
        .filter(|pos| !used_changes.contains(pos))
        .collect();
    let unassigned_participants: BTreeSet<usize> = (next_participant..n).collect();

    tracing::info!(
        locked_inputs = input_owner.len(),
        total_inputs = tx.inputs().len(),
        locked_participants = next_participant,
        taker_locked = taker.is_some(),
        "greedy preprocessing done"
    );

    GreedyAssignment {
        input_owner,
        change_of,
        taker,
        unassigned_inputs,
        unassigned_changes,
        unassigned_participants,
    }
}
