//! Candidate CoinJoin transaction model.
//!
//! A [`CoinJoinTx`] is built once from raw input/output amounts and never
//! mutated. Construction detects the equal-output denomination (the
//! JoinMarket anonymity set), splits outputs into equal and change, and
//! validates the balance. Everything downstream — preprocessor, ILP,
//! solutions — reads this structure.

use crate::error::AnalyzeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Integer satoshis.
pub type Amount = u64;

/// A transaction input or output, with its position in the transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
    pub index: usize,
    pub amount: Amount,
    pub address: String,
}

/// An immutable, validated CoinJoin candidate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinJoinTx {
    txid: String,
    inputs: Vec<Utxo>,
    equal_outputs: Vec<Utxo>,
    change_outputs: Vec<Utxo>,
    equal_amount: Amount,
    num_participants: usize,
    network_fee: Amount,
}

impl CoinJoinTx {
    /// Validate raw inputs/outputs and split outputs into the equal set and
    /// change. Output `index` fields must be the on-chain positions.
    ///
    /// The denomination is the most frequent output amount; ties break
    /// toward the larger amount. Multiplicity below 2 is not a CoinJoin.
    pub fn new(
        txid: impl Into<String>,
        inputs: Vec<Utxo>,
        outputs: Vec<Utxo>,
    ) -> Result<Self, AnalyzeError> {
        let txid = txid.into();

        let mut multiplicity: BTreeMap<Amount, usize> = BTreeMap::new();
        for out in &outputs {
            *multiplicity.entry(out.amount).or_default() += 1;
        }
        // Ascending amount iteration + `>=` leaves the largest amount among
        // the maximal-multiplicity candidates.
        let mut equal_amount = 0;
        let mut num_participants = 0;
        for (&amount, &count) in &multiplicity {
            if count >= num_participants {
                equal_amount = amount;
                num_participants = count;
            }
        }
        if num_participants < 2 {
            return Err(AnalyzeError::NotACoinJoin(format!(
                "no output denomination repeats (txid {})",
                txid
            )));
        }
        if inputs.len() < num_participants {
            return Err(AnalyzeError::NotACoinJoin(format!(
                "{} inputs cannot serve {} participants (txid {})",
                inputs.len(),
                num_participants,
                txid
            )));
        }

        let total_in: Amount = inputs.iter().map(|i| i.amount).sum();
        let total_out: Amount = outputs.iter().map(|o| o.amount).sum();
        if total_in < total_out {
            return Err(AnalyzeError::InconsistentBalance {
                total_in,
                total_out,
            });
        }

        let (equal_outputs, change_outputs): (Vec<Utxo>, Vec<Utxo>) = outputs
            .into_iter()
            .partition(|o| o.amount == equal_amount);

        Ok(Self {
            txid,
            inputs,
            equal_outputs,
            change_outputs,
            equal_amount,
            num_participants,
            network_fee: total_in - total_out,
        })
    }

    /// Convenience constructor from bare amounts; addresses become
    /// `input_<i>` / `output_<i>` and indices follow list order.
    pub fn from_amounts(
        txid: impl Into<String>,
        inputs: &[Amount],
        outputs: &[Amount],
    ) -> Result<Self, AnalyzeError> {
        let inputs = inputs
            .iter()
            .enumerate()
            .map(|(index, &amount)| Utxo {
                index,
                amount,
                address: format!("input_{}", index),
            })
            .collect();
        let outputs = outputs
            .iter()
            .enumerate()
            .map(|(index, &amount)| Utxo {
                index,
                amount,
                address: format!("output_{}", index),
            })
            .collect();
        Self::new(txid, inputs, outputs)
    }

    pub fn txid(&self) -> &str {
        &self.txid
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn equal_outputs(&self) -> &[Utxo] {
        &self.equal_outputs
    }

    pub fn change_outputs(&self) -> &[Utxo] {
        &self.change_outputs
    }

    pub fn equal_amount(&self) -> Amount {
        self.equal_amount
    }

    pub fn num_participants(&self) -> usize {
        self.num_participants
    }

    pub fn network_fee(&self) -> Amount {
        self.network_fee
    }

    pub fn num_outputs(&self) -> usize {
        self.equal_outputs.len() + self.change_outputs.len()
    }

    pub fn total_input(&self) -> Amount {
        self.inputs.iter().map(|i| i.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_denomination_and_participants() {
        let tx = CoinJoinTx::from_amounts(
            "tx",
            &[150_000, 200_000, 130_000],
            &[100_000, 100_000, 100_000, 50_300, 100_400],
        )
        .unwrap();
        assert_eq!(tx.equal_amount(), 100_000);
        assert_eq!(tx.num_participants(), 3);
        assert_eq!(tx.equal_outputs().len(), 3);
        assert_eq!(tx.change_outputs().len(), 2);
        assert_eq!(tx.network_fee(), 480_000 - 450_700);
    }

    #[test]
    fn fewer_inputs_than_participants_is_rejected() {
        let err = CoinJoinTx::from_amounts("tx", &[300_000], &[100_000, 100_000, 60_000])
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::NotACoinJoin(_)));
    }

    #[test]
    fn outputs_keep_on_chain_indices() {
        let tx = CoinJoinTx::from_amounts(
            "tx",
            &[150_000, 160_000],
            &[40_000, 100_000, 100_000, 60_000],
        )
        .unwrap();
        let change: Vec<usize> = tx.change_outputs().iter().map(|c| c.index).collect();
        assert_eq!(change, vec![0, 3]);
        let equal: Vec<usize> = tx.equal_outputs().iter().map(|e| e.index).collect();
        assert_eq!(equal, vec![1, 2]);
    }

    #[test]
    fn multiplicity_tie_breaks_to_larger_amount() {
        let tx = CoinJoinTx::from_amounts(
            "tx",
            &[200_000, 200_000, 200_000],
            &[50_000, 50_000, 100_000, 100_000],
        )
        .unwrap();
        assert_eq!(tx.equal_amount(), 100_000);
        assert_eq!(tx.num_participants(), 2);
    }

    #[test]
    fn larger_multiplicity_beats_larger_amount() {
        let tx = CoinJoinTx::from_amounts(
            "tx",
            &[100_000, 100_000, 100_000],
            &[30_000, 30_000, 30_000, 90_000, 90_000],
        )
        .unwrap();
        assert_eq!(tx.equal_amount(), 30_000);
        assert_eq!(tx.num_participants(), 3);
    }

    #[test]
    fn all_distinct_outputs_is_not_a_coinjoin() {
        let err = CoinJoinTx::from_amounts("tx", &[500_000], &[100_000, 200_000, 150_000])
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::NotACoinJoin(_)));
    }

    #[test]
    fn outputs_exceeding_inputs_fail() {
        let err = CoinJoinTx::from_amounts("tx", &[100_000, 100_000], &[150_000, 150_000])
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyzeError::InconsistentBalance { total_in: 200_000, total_out: 300_000 }
        ));
    }

    #[test]
    fn zero_network_fee_is_allowed() {
        let tx = CoinJoinTx::from_amounts("tx", &[100_000, 100_000], &[100_000, 100_000]).unwrap();
        assert_eq!(tx.network_fee(), 0);
    }
}
