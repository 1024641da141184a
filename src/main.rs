use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unmix::cancel::CancelToken;
use unmix::config::AnalyzerConfig;
use unmix::core::enumerate::{enumerate_solutions, EnumerationObserver, StopReason};
use unmix::core::solution::{Role, Solution};
use unmix::core::types::CoinJoinTx;
use unmix::fetch::{EsploraClient, DEFAULT_ESPLORA_URL};
use unmix::output::{default_output_path, taker_distribution, write_report, ReportWriter};
use unmix::solver::BranchBoundSolver;

#[derive(Parser)]
#[command(name = "unmix")]
#[command(about = "Enumerate the hidden participant structure of JoinMarket CoinJoins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a transaction and enumerate all consistent assignments
    Analyze {
        /// Transaction id (64 hex chars)
        txid: String,

        /// Max maker fee as a fraction of the equal amount
        #[arg(long, default_value_t = 0.05)]
        max_fee_rel: f64,

        /// Stop after this many distinct solutions
        #[arg(long, default_value_t = 1000)]
        max_solutions: usize,

        /// Report path (default: solutions_<first8(txid)>.json)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Wall-clock budget per solver call, in seconds
        #[arg(long, default_value_t = 60)]
        timeout_per_solve: u64,

        /// Resident-memory ceiling, in GiB
        #[arg(long, default_value_t = 10)]
        memory_limit_gb: u64,

        /// Smallest spendable change output, in satoshis
        #[arg(long, default_value_t = 546)]
        dust_threshold: u64,

        /// Esplora-compatible API base URL
        #[arg(long, default_value = DEFAULT_ESPLORA_URL)]
        esplora_url: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unmix=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Analyze {
            txid,
            max_fee_rel,
            max_solutions,
            output,
            timeout_per_solve,
            memory_limit_gb,
            dust_threshold,
            esplora_url,
        } => {
            let config = AnalyzerConfig {
                max_fee_rel,
                max_solutions,
                dust_threshold,
                per_solve_timeout: Duration::from_secs(timeout_per_solve),
                memory_limit_bytes: memory_limit_gb * 1024 * 1024 * 1024,
            };
            run_analyze(txid, config, output, esplora_url).await
        }
    };
    std::process::exit(code);
}

async fn run_analyze(
    txid: String,
    config: AnalyzerConfig,
    output: Option<PathBuf>,
    esplora_url: String,
) -> i32 {
    if let Err(err) = config.validate() {
        tracing::error!("{:#}", err);
        return 3;
    }

    let client = EsploraClient::new(esplora_url);
    let tx = match client.fetch_coinjoin(&txid).await {
        Ok(tx) => tx,
        Err(err) => {
            tracing::error!("{}", err);
            return err.exit_code();
        }
    };
    tracing::info!(
        participants = tx.num_participants(),
        equal_amount = tx.equal_amount(),
        inputs = tx.inputs().len(),
        change_outputs = tx.change_outputs().len(),
        network_fee = tx.network_fee(),
        "parsed CoinJoin candidate"
    );

    let output_path = output.unwrap_or_else(|| default_output_path(tx.txid()));

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing the current solve");
                cancel.cancel();
            }
        });
    }

    let worker_tx = tx.clone();
    let worker_config = config.clone();
    let worker_cancel = cancel.clone();
    let worker_path = output_path.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut observer = CliObserver {
            writer: ReportWriter::new(worker_tx.clone(), worker_path),
        };
        enumerate_solutions(
            &worker_tx,
            &worker_config,
            &BranchBoundSolver::new(),
            &worker_cancel,
            &mut observer,
        )
    })
    .await;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            tracing::error!("enumeration task failed: {}", err);
            return 4;
        }
    };

    if let Err(err) = write_report(&output_path, &tx, &result.solutions) {
        tracing::error!("failed to write {}: {:#}", output_path.display(), err);
    }
    summarize(&tx, &result.solutions);
    match &result.stop {
        StopReason::Exhausted if result.solutions.is_empty() => {
            tracing::error!("no valid solutions found")
        }
        StopReason::Cancelled => tracing::warn!(
            "cancelled; {} solution(s) saved to {}",
            result.solutions.len(),
            output_path.display()
        ),
        StopReason::TimeLimit => tracing::warn!("per-solve time limit hit; partial results saved"),
        StopReason::MemoryLimit { used, limit } => tracing::error!(
            "memory limit exceeded ({} > {} bytes); partial results saved",
            used,
            limit
        ),
        StopReason::SolverFailure(msg) => tracing::error!("solver failure: {}", msg),
        _ => {}
    }
    result.stop.exit_code(result.solutions.len())
}

struct CliObserver {
    writer: ReportWriter,
}

impl EnumerationObserver for CliObserver {
    fn on_iteration(&mut self, iteration: usize) {
        tracing::info!("solving iteration {}", iteration);
    }

    fn on_solution(&mut self, index: usize, solution: &Solution) -> anyhow::Result<()> {
        let taker = solution.taker();
        tracing::info!(
            "solution #{}: taker is participant {} paying {} sats ({} network + {} maker fees)",
            index,
            solution.taker_index + 1,
            taker.fee,
            solution.network_fee,
            solution.total_maker_fees
        );
        for (idx, participant) in solution.participants.iter().enumerate() {
            let inputs: Vec<usize> = participant.inputs.iter().map(|i| i.index).collect();
            let change = participant
                .change_output
                .as_ref()
                .map(|c| format!("change[{}]={} sats", c.index, c.amount))
                .unwrap_or_else(|| "no change".into());
            tracing::info!(
                "  participant {} ({:?}): inputs {:?}, {}, fee {}",
                idx + 1,
                participant.role,
                inputs,
                change,
                participant.fee
            );
        }
        self.writer.on_solution(index, solution)
    }
}

fn summarize(tx: &CoinJoinTx, solutions: &[Solution]) {
    match solutions.len() {
        0 => tracing::warn!("no valid solutions found"),
        1 => {
            let solution = &solutions[0];
            tracing::info!(
                "unique solution: transaction {} is unambiguous, taker is participant {}",
                tx.txid(),
                solution.taker_index + 1
            );
            for (idx, participant) in solution.participants.iter().enumerate() {
                if participant.role == Role::Maker {
                    tracing::info!(
                        "  maker participant {} received {} sats",
                        idx + 1,
                        participant.fee.unsigned_abs()
                    );
                }
            }
        }
        n => {
            tracing::warn!(
                "{} distinct solutions: transaction is ambiguous, de-anonymization inconclusive",
                n
            );
            for (idx, share) in taker_distribution(solutions) {
                tracing::info!(
                    "  participant {} is the taker in {:.1}% of solutions",
                    idx + 1,
                    share * 100.0
                );
            }
        }
    }
}
