//! Canonical solution records.
//!
//! A [`Solution`] is one complete de-anonymization: every input and change
//! output assigned to a participant, exactly one taker. Participants are
//! kept in canonical order (ascending minimum owned input index) so that
//! relabelings collapse to a single representative. [`Solution::validate`]
//! re-checks every model constraint on extraction — a solver answer that
//! fails it is treated as a solver defect, not emitted.

use crate::config::AnalyzerConfig;
use crate::core::types::{Amount, CoinJoinTx, Utxo};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Taker,
    Maker,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub role: Role,
    /// Owned inputs, ascending by index.
    pub inputs: Vec<Utxo>,
    pub equal_output: Amount,
    pub change_output: Option<Utxo>,
    /// Signed, contributed − received: positive pays, negative earns.
    pub fee: i64,
}

impl Participant {
    pub fn input_sum(&self) -> Amount {
        self.inputs.iter().map(|i| i.amount).sum()
    }

    pub fn min_input_index(&self) -> usize {
        self.inputs.first().map(|i| i.index).unwrap_or(usize::MAX)
    }
}

/// `(sorted input indices, change output index)` — a participant stripped
/// of its label.
pub type ParticipantProfile = (Vec<usize>, Option<usize>);

/// Relabeling-invariant identity: sorted participant profiles plus the
/// taker's own profile.
pub type SolutionSignature = (Vec<ParticipantProfile>, ParticipantProfile);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub participants: Vec<Participant>,
    pub taker_index: usize,
    pub total_maker_fees: Amount,
    pub network_fee: Amount,
    /// `|fee_taker − (total_maker_fees + network_fee)|`; 0 when balanced.
    pub discrepancy: Amount,
}

impl Solution {
    /// Build a canonical solution from per-participant raw assignments:
    /// `(input indices, change position in tx.change_outputs(), is_taker)`.
    pub fn assemble(tx: &CoinJoinTx, parts: Vec<(Vec<usize>, Option<usize>, bool)>) -> Self {
        let equal = tx.equal_amount();
        let mut participants: Vec<Participant> = parts
            .into_iter()
            .map(|(mut input_idxs, change_pos, is_taker)| {
                input_idxs.sort_unstable();
                let inputs: Vec<Utxo> = input_idxs
                    .iter()
                    .map(|&i| tx.inputs()[i].clone())
                    .collect();
                let change_output = change_pos.map(|pos| tx.change_outputs()[pos].clone());
                let contributed: i64 = inputs.iter().map(|i| i.amount as i64).sum();
                let change: i64 = change_output.as_ref().map(|c| c.amount as i64).unwrap_or(0);
                Participant {
                    role: if is_taker { Role::Taker } else { Role::Maker },
                    inputs,
                    equal_output: equal,
                    change_output,
                    fee: contributed - equal as i64 - change,
                }
            })
            .collect();

        participants.sort_by_key(|p| p.min_input_index());

        let taker_index = participants
            .iter()
            .position(|p| p.role == Role::Taker)
            .unwrap_or(0);
        let total_maker_fees: Amount = participants
            .iter()
            .filter(|p| p.role == Role::Maker)
            .map(|p| p.fee.unsigned_abs())
            .sum();
        let taker_fee = participants[taker_index].fee;
        let discrepancy =
            (taker_fee - (total_maker_fees as i64 + tx.network_fee() as i64)).unsigned_abs();

        Self {
            participants,
            taker_index,
            total_maker_fees,
            network_fee: tx.network_fee(),
            discrepancy,
        }
    }

    pub fn taker(&self) -> &Participant {
        &self.participants[self.taker_index]
    }

    pub fn signature(&self) -> SolutionSignature {
        let profiles: Vec<ParticipantProfile> = self
            .participants
            .iter()
            .map(|p| {
                (
                    p.inputs.iter().map(|i| i.index).collect(),
                    p.change_output.as_ref().map(|c| c.index),
                )
            })
            .collect();
        let taker_profile = profiles[self.taker_index].clone();
        let mut sorted = profiles;
        sorted.sort();
        (sorted, taker_profile)
    }

    /// Re-check every constraint the model is supposed to enforce.
    pub fn validate(&self, tx: &CoinJoinTx, config: &AnalyzerConfig) -> Result<(), String> {
        let n = tx.num_participants();
        if self.participants.len() != n {
            return Err(format!(
                "{} participants, expected {}",
                self.participants.len(),
                n
            ));
        }

        // Inputs partition exactly.
        let mut owned_inputs: Vec<usize> = self
            .participants
            .iter()
            .flat_map(|p| p.inputs.iter().map(|i| i.index))
            .collect();
        owned_inputs.sort_unstable();
        let expected: Vec<usize> = (0..tx.inputs().len()).collect();
        if owned_inputs != expected {
            return Err("inputs are not partitioned across participants".into());
        }
        if self.participants.iter().any(|p| p.inputs.is_empty()) {
            return Err("participant with no inputs".into());
        }

        // Every change output owned exactly once.
        let mut owned_changes: Vec<usize> = self
            .participants
            .iter()
            .filter_map(|p| p.change_output.as_ref().map(|c| c.index))
            .collect();
        owned_changes.sort_unstable();
        let mut expected_changes: Vec<usize> =
            tx.change_outputs().iter().map(|c| c.index).collect();
        expected_changes.sort_unstable();
        if owned_changes != expected_changes {
            return Err("change outputs are not partitioned across participants".into());
        }
        for p in &self.participants {
            if let Some(change) = &p.change_output {
                if change.amount < config.dust_threshold {
                    return Err(format!("change output {} is dust", change.index));
                }
            }
        }

        // Exactly one taker, and it is where taker_index points.
        let takers = self
            .participants
            .iter()
            .filter(|p| p.role == Role::Taker)
            .count();
        if takers != 1 {
            return Err(format!("{} takers, expected exactly 1", takers));
        }
        if self.participants[self.taker_index].role != Role::Taker {
            return Err("taker_index does not point at the taker".into());
        }

        // Fee directions and bounds.
        let max_fee_abs = config.max_fee_abs(tx.equal_amount()) as i64;
        let network_fee = tx.network_fee() as i64;
        for (idx, p) in self.participants.iter().enumerate() {
            let change: i64 = p.change_output.as_ref().map(|c| c.amount as i64).unwrap_or(0);
            let recomputed = p.input_sum() as i64 - p.equal_output as i64 - change;
            if recomputed != p.fee {
                return Err(format!("participant {} fee does not balance", idx));
            }
            match p.role {
                Role::Maker => {
                    if p.fee > 0 {
                        return Err(format!("maker {} pays a fee", idx));
                    }
                    if p.fee < -max_fee_abs {
                        return Err(format!("maker {} earns above the fee bound", idx));
                    }
                }
                Role::Taker => {
                    if p.fee < network_fee {
                        return Err("taker fee does not cover the network fee".into());
                    }
                    if p.fee > max_fee_abs * (n as i64 - 1) + network_fee {
                        return Err("taker fee exceeds the fee bound".into());
                    }
                }
            }
        }

        // Global balance.
        let fee_sum: i64 = self.participants.iter().map(|p| p.fee).sum();
        if fee_sum != network_fee {
            return Err(format!(
                "fees sum to {} but the network fee is {}",
                fee_sum, network_fee
            ));
        }

        // Canonical order.
        let mins: Vec<usize> = self
            .participants
            .iter()
            .map(|p| p.min_input_index())
            .collect();
        if !mins.windows(2).all(|w| w[0] < w[1]) {
            return Err("participants are not in canonical order".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CoinJoinTx;

    fn tx() -> CoinJoinTx {
        CoinJoinTx::from_amounts(
            "tx",
            &[150_000, 200_000, 130_000],
            &[100_000, 100_000, 100_000, 50_300, 100_400, 28_300],
        )
        .unwrap()
    }

    fn solution() -> Solution {
        Solution::assemble(
            &tx(),
            vec![
                (vec![0], Some(0), false),
                (vec![1], Some(1), false),
                (vec![2], Some(2), true),
            ],
        )
    }

    #[test]
    fn assemble_computes_fees_and_totals() {
        let s = solution();
        assert_eq!(s.taker_index, 2);
        assert_eq!(s.participants[0].fee, -300);
        assert_eq!(s.participants[1].fee, -400);
        assert_eq!(s.participants[2].fee, 1_700);
        assert_eq!(s.total_maker_fees, 700);
        assert_eq!(s.network_fee, 1_000);
        assert_eq!(s.discrepancy, 0);
    }

    #[test]
    fn assemble_canonicalizes_participant_order() {
        let shuffled = Solution::assemble(
            &tx(),
            vec![
                (vec![2], Some(2), true),
                (vec![1], Some(1), false),
                (vec![0], Some(0), false),
            ],
        );
        assert_eq!(shuffled, solution());
        assert_eq!(shuffled.taker_index, 2);
    }

    #[test]
    fn signature_is_relabeling_invariant() {
        let a = solution();
        let b = Solution::assemble(
            &tx(),
            vec![
                (vec![1], Some(1), false),
                (vec![2], Some(2), true),
                (vec![0], Some(0), false),
            ],
        );
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_distinguishes_taker_position() {
        // Same partition, different taker → different signature.
        let tx = CoinJoinTx::from_amounts(
            "dual-role",
            &[120_000, 150_000],
            &[100_000, 100_000, 20_000, 50_000],
        )
        .unwrap();
        let a = Solution::assemble(
            &tx,
            vec![(vec![0], Some(0), true), (vec![1], Some(1), false)],
        );
        let b = Solution::assemble(
            &tx,
            vec![(vec![0], Some(0), false), (vec![1], Some(1), true)],
        );
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn valid_solution_passes_validation() {
        let cfg = AnalyzerConfig::default();
        assert_eq!(solution().validate(&tx(), &cfg), Ok(()));
    }

    #[test]
    fn validation_rejects_tampered_fee() {
        let cfg = AnalyzerConfig::default();
        let mut s = solution();
        s.participants[0].fee = 0;
        assert!(s.validate(&tx(), &cfg).is_err());
    }

    #[test]
    fn validation_rejects_wrong_taker_count() {
        let cfg = AnalyzerConfig::default();
        let mut s = solution();
        s.participants[0].role = Role::Taker;
        assert!(s.validate(&tx(), &cfg).is_err());
    }

    #[test]
    fn validation_rejects_missing_change_owner() {
        let cfg = AnalyzerConfig::default();
        let mut s = solution();
        s.participants[0].change_output = None;
        assert!(s.validate(&tx(), &cfg).is_err());
    }

    #[test]
    fn validation_rejects_out_of_order_participants() {
        let cfg = AnalyzerConfig::default();
        let mut s = solution();
        s.participants.swap(0, 1);
        assert!(s.validate(&tx(), &cfg).is_err());
    }
}
