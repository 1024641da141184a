//! Block-explorer transaction fetch.
//!
//! Talks to an esplora-style HTTP API (`GET <base>/tx/<txid>`). Transport
//! failures are retried with exponential back-off before being surfaced;
//! a 404 is final. Parsing into the immutable [`CoinJoinTx`] happens
//! locally so tests never touch the network.

use crate::core::types::{CoinJoinTx, Utxo};
use crate::error::AnalyzeError;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_ESPLORA_URL: &str = "https://blockstream.info/api";

const FETCH_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The slice of an esplora transaction the analyzer needs.
#[derive(Clone, Debug, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub vin: Vec<RawInput>,
    pub vout: Vec<RawOutput>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawInput {
    pub prevout: RawOutput,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawOutput {
    pub value: u64,
    pub scriptpubkey_address: Option<String>,
}

/// A txid is 32 bytes of hex.
pub fn validate_txid(txid: &str) -> Result<(), AnalyzeError> {
    match hex::decode(txid) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(AnalyzeError::BadTxid(txid.to_string())),
    }
}

/// Turn a raw transaction into the validated CoinJoin model. Outputs
/// without an address (op_return and friends) render as `unknown_<idx>`.
pub fn parse_raw(raw: &RawTransaction) -> Result<CoinJoinTx, AnalyzeError> {
    let inputs: Vec<Utxo> = raw
        .vin
        .iter()
        .enumerate()
        .map(|(index, vin)| Utxo {
            index,
            amount: vin.prevout.value,
            address: vin
                .prevout
                .scriptpubkey_address
                .clone()
                .unwrap_or_else(|| format!("unknown_{}", index)),
        })
        .collect();
    let outputs: Vec<Utxo> = raw
        .vout
        .iter()
        .enumerate()
        .map(|(index, vout)| Utxo {
            index,
            amount: vout.value,
            address: vout
                .scriptpubkey_address
                .clone()
                .unwrap_or_else(|| format!("unknown_{}", index)),
        })
        .collect();
    CoinJoinTx::new(raw.txid.clone(), inputs, outputs)
}

#[derive(Clone, Debug)]
pub struct EsploraClient {
    base_url: String,
    client: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn fetch_transaction(&self, txid: &str) -> Result<RawTransaction, AnalyzeError> {
        validate_txid(txid)?;
        let url = format!("{}/tx/{}", self.base_url.trim_end_matches('/'), txid);
        tracing::info!(%txid, "fetching transaction");

        let mut last_err = String::new();
        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * (1 << attempt));
                tracing::warn!(
                    "fetch attempt {} failed ({}), retrying in {:?}",
                    attempt,
                    last_err,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            let response = match self
                .client
                .get(&url)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    last_err = err.to_string();
                    continue;
                }
            };
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(AnalyzeError::NotFound(txid.to_string()));
            }
            let response = match response.error_for_status() {
                Ok(response) => response,
                Err(err) => {
                    last_err = err.to_string();
                    continue;
                }
            };
            match response.json::<RawTransaction>().await {
                Ok(raw) => return Ok(raw),
                Err(err) => last_err = err.to_string(),
            }
        }
        Err(AnalyzeError::Network(last_err))
    }

    /// Fetch and validate in one step.
    pub async fn fetch_coinjoin(&self, txid: &str) -> Result<CoinJoinTx, AnalyzeError> {
        let raw = self.fetch_transaction(txid).await?;
        parse_raw(&raw)
    }
}
