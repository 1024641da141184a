//! JSON report writing.
//!
//! The report is rewritten atomically (serialize to a tempfile in the
//! target directory, then rename over the destination) after every emitted
//! solution, so an interrupted run always leaves a complete, valid file
//! on disk.

use crate::core::enumerate::EnumerationObserver;
use crate::core::solution::{Role, Solution};
use crate::core::types::{Amount, CoinJoinTx};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct Report {
    pub transaction: TxSummary,
    pub num_solutions: usize,
    pub solutions: Vec<SolutionRecord>,
}

#[derive(Debug, Serialize)]
pub struct TxSummary {
    pub txid: String,
    pub num_participants: usize,
    pub equal_amount: Amount,
    pub network_fee: Amount,
    pub num_inputs: usize,
    pub num_outputs: usize,
}

#[derive(Debug, Serialize)]
pub struct SolutionRecord {
    pub solution_id: usize,
    pub taker_index: usize,
    pub total_maker_fees: Amount,
    pub network_fee: Amount,
    pub discrepancy: Amount,
    pub participants: Vec<ParticipantRecord>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantRecord {
    pub participant_id: usize,
    pub role: Role,
    pub num_inputs: usize,
    pub input_indices: Vec<usize>,
    pub input_sum: Amount,
    pub equal_output: Amount,
    pub change_output_index: Option<usize>,
    pub change_amount: Amount,
    pub fee: i64,
}

impl Report {
    pub fn new(tx: &CoinJoinTx, solutions: &[Solution]) -> Self {
        Self {
            transaction: TxSummary {
                txid: tx.txid().to_string(),
                num_participants: tx.num_participants(),
                equal_amount: tx.equal_amount(),
                network_fee: tx.network_fee(),
                num_inputs: tx.inputs().len(),
                num_outputs: tx.num_outputs(),
            },
            num_solutions: solutions.len(),
            solutions: solutions
                .iter()
                .enumerate()
                .map(|(idx, solution)| SolutionRecord {
                    solution_id: idx + 1,
                    taker_index: solution.taker_index,
                    total_maker_fees: solution.total_maker_fees,
                    network_fee: solution.network_fee,
                    discrepancy: solution.discrepancy,
                    participants: solution
                        .participants
                        .iter()
                        .enumerate()
                        .map(|(p_idx, p)| ParticipantRecord {
                            participant_id: p_idx + 1,
                            role: p.role,
                            num_inputs: p.inputs.len(),
                            input_indices: p.inputs.iter().map(|i| i.index).collect(),
                            input_sum: p.input_sum(),
                            equal_output: p.equal_output,
                            change_output_index: p.change_output.as_ref().map(|c| c.index),
                            change_amount: p
                                .change_output
                                .as_ref()
                                .map(|c| c.amount)
                                .unwrap_or(0),
                            fee: p.fee,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// `solutions_<first8(txid)>.json` in the working directory.
pub fn default_output_path(txid: &str) -> PathBuf {
    let prefix: String = txid.chars().take(8).collect();
    PathBuf::from(format!("solutions_{}.json", prefix))
}

/// Atomically (re)write the full report.
pub fn write_report(path: &Path, tx: &CoinJoinTx, solutions: &[Solution]) -> Result<()> {
    let report = Report::new(tx, solutions);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating tempfile next to {}", path.display()))?;
    serde_json::to_writer_pretty(&mut tmp, &report)?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Share of enumerated solutions that name each participant the taker.
pub fn taker_distribution(solutions: &[Solution]) -> BTreeMap<usize, f64> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for solution in solutions {
        *counts.entry(solution.taker_index).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(idx, count)| (idx, count as f64 / solutions.len() as f64))
        .collect()
}

/// Observer that keeps the on-disk report current as solutions arrive.
pub struct ReportWriter {
    tx: CoinJoinTx,
    path: PathBuf,
    solutions: Vec<Solution>,
}

impl ReportWriter {
    pub fn new(tx: CoinJoinTx, path: impl Into<PathBuf>) -> Self {
        Self {
            tx,
            path: path.into(),
            solutions: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnumerationObserver for ReportWriter {
    fn on_solution(&mut self, index: usize, solution: &Solution) -> Result<()> {
        self.solutions.push(solution.clone());
        write_report(&self.path, &self.tx, &self.solutions)?;
        tracing::info!(
            "saved {} solution(s) to {} (solution {})",
            self.solutions.len(),
            self.path.display(),
            index
        );
        Ok(())
    }
}
