use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use qwop_search::action::action_codes;
use qwop_search::checkpoint::{list_checkpoints, load_checkpoint, read_checkpoint_file};
use qwop_search::config::{
    resolve_accept_length, resolve_checkpoint_dir, resolve_checkpoint_interval,
    resolve_max_frontier, resolve_replay_port,
};
use qwop_search::evaluate::BackwardReference;
use qwop_search::replay::{
    ReplayOptions, ReplaySession, ReplaySource, run_replay, select_replay_candidate,
};
use qwop_search::{
    RagdollFactory, RolloutConfig, SearchConfig, SearchOrder, SearchState, run_search,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "qwop-search")]
#[command(about = "Best-first search for ragdoll walking gaits over discrete leg actions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the search (the default when no subcommand is given)
    Search(SearchArgs),
    /// Replay the best stored candidate and stream poses to websocket viewers
    Replay(ReplayArgs),
    /// List stored checkpoints, newest first
    Checkpoints {
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct SearchArgs {
    /// Continue from a checkpoint file instead of the four seed sequences
    #[arg(long)]
    resume: Option<PathBuf>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Seconds between periodic checkpoints
    #[arg(long)]
    checkpoint_secs: Option<u64>,
    /// Sequence length at which a candidate is accepted
    #[arg(long)]
    accept_length: Option<usize>,
    #[arg(long)]
    max_frontier: Option<usize>,
    #[arg(long)]
    max_expansions: Option<u64>,
    /// Expand in insertion order instead of by score
    #[arg(long)]
    breadth_first: bool,
    /// Only reject positions behind the start, not behind the previous action
    #[arg(long)]
    origin_backward_check: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Checkpoint file; defaults to latest.json in the checkpoint directory
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = CliReplaySet::Best)]
    set: CliReplaySet,
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,
    #[arg(long)]
    port: Option<u16>,
    /// Exit after one pass instead of looping
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliReplaySet {
    Best,
    Accepted,
    Frontier,
}

impl From<CliReplaySet> for ReplaySource {
    fn from(value: CliReplaySet) -> Self {
        match value {
            CliReplaySet::Best => ReplaySource::Best,
            CliReplaySet::Accepted => ReplaySource::Accepted,
            CliReplaySet::Frontier => ReplaySource::Frontier,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or_else(|| Commands::Search(SearchArgs::default())) {
        Commands::Search(args) => run_search_command(args).await,
        Commands::Replay(args) => run_replay_command(args).await,
        Commands::Checkpoints { checkpoint_dir } => {
            let dir = checkpoint_dir.unwrap_or_else(resolve_checkpoint_dir);
            let summaries = list_checkpoints(&dir)
                .with_context(|| format!("failed listing checkpoints in {}", dir.display()))?;
            if summaries.is_empty() {
                println!("no checkpoints in {}", dir.display());
            }
            for summary in summaries {
                println!(
                    "{}\topen={}\taccepted={}\tbest_open={}\tbest_accepted={}",
                    summary.id,
                    summary.frontier_len,
                    summary.accepted_len,
                    format_score(summary.best_open_score),
                    format_score(summary.best_accepted_score)
                );
            }
            Ok(())
        }
    }
}

fn format_score(score: Option<f32>) -> String {
    score
        .map(|value| format!("{value:.4}"))
        .unwrap_or_else(|| "-".to_string())
}

async fn run_search_command(args: SearchArgs) -> Result<()> {
    let config = SearchConfig {
        accept_length: args.accept_length.unwrap_or_else(resolve_accept_length),
        order: if args.breadth_first {
            SearchOrder::BreadthFirst
        } else {
            SearchOrder::BestFirst
        },
        max_frontier: Some(args.max_frontier.unwrap_or_else(resolve_max_frontier)),
        max_expansions: args.max_expansions,
        checkpoint_interval: Some(
            args.checkpoint_secs
                .map(Duration::from_secs)
                .unwrap_or_else(resolve_checkpoint_interval),
        ),
        checkpoint_dir: Some(args.checkpoint_dir.unwrap_or_else(resolve_checkpoint_dir)),
        rollout: RolloutConfig {
            backward_reference: if args.origin_backward_check {
                BackwardReference::Origin
            } else {
                BackwardReference::PreviousAction
            },
        },
    };
    let resume = match &args.resume {
        Some(path) => Some(
            read_checkpoint_file(path)
                .with_context(|| format!("failed loading checkpoint {}", path.display()))?,
        ),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = stop.clone();
    let mut worker = tokio::task::spawn_blocking(move || {
        let factory = RagdollFactory::default();
        let mut state = match resume {
            Some(file) => {
                info!("resuming from checkpoint {}", file.id);
                SearchState::from_checkpoint(file, &config)
            }
            None => SearchState::seeded(&factory, &config)?,
        };
        run_search(&factory, &config, &mut state, &worker_stop)
    });

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received; stopping after the current expansion");
            stop.store(true, Ordering::Relaxed);
            worker.await
        }
    };
    let report = joined
        .context("search worker panicked")?
        .context("search failed")?;
    info!("search done: {report:?}");
    Ok(())
}

async fn run_replay_command(args: ReplayArgs) -> Result<()> {
    let checkpoint = match &args.checkpoint {
        Some(path) => read_checkpoint_file(path)
            .with_context(|| format!("failed loading checkpoint {}", path.display()))?,
        None => {
            let dir = args
                .checkpoint_dir
                .clone()
                .unwrap_or_else(resolve_checkpoint_dir);
            load_checkpoint(&dir, None)
                .with_context(|| format!("failed loading latest checkpoint in {}", dir.display()))?
        }
    };
    let candidate = select_replay_candidate(&checkpoint, args.set.into())
        .ok_or_else(|| anyhow!("checkpoint '{}' has no candidate to replay", checkpoint.id))?;
    info!(
        "replaying {} actions from checkpoint {}: score={:.4}, distance={:.3}m",
        candidate.len(),
        checkpoint.id,
        candidate.score(),
        candidate.evaluation().distance
    );
    info!("actions: {:?}", action_codes(candidate.actions()));

    let session = ReplaySession::new(RagdollFactory::default(), candidate.actions())
        .context("failed building replay session")?;
    let options = ReplayOptions {
        tick: Duration::from_millis(args.tick_ms.max(1)),
        port: args.port.unwrap_or_else(resolve_replay_port),
        once: args.once,
    };
    run_replay(session, options, async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("replay failed")
}
