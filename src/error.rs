//! Error taxonomy for the analysis pipeline.
//!
//! Everything that can abort a run before the enumeration loop starts is an
//! [`AnalyzeError`]. Loop terminations (clean or not) are reported through
//! `core::enumerate::StopReason` instead so that already-emitted solutions
//! are always preserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("not a CoinJoin: {0}")]
    NotACoinJoin(String),
    #[error("inconsistent balance: inputs {total_in} sat < outputs {total_out} sat")]
    InconsistentBalance { total_in: u64, total_out: u64 },
    #[error("malformed txid: {0}")]
    BadTxid(String),
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("solver error: {0}")]
    Solver(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyzeError {
    /// CLI exit code: 3 for anything wrong with the user's input or its
    /// retrieval, 4 for a misbehaving solver backend.
    pub fn exit_code(&self) -> i32 {
        match self {
            AnalyzeError::NotACoinJoin(_)
            | AnalyzeError::InconsistentBalance { .. }
            | AnalyzeError::BadTxid(_)
            | AnalyzeError::NotFound(_)
            | AnalyzeError::Network(_)
            | AnalyzeError::Config(_)
            | AnalyzeError::Io(_) => 3,
            AnalyzeError::Solver(_) => 4,
        }
    }
}
