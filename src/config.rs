//! Environment overrides for compiled-in defaults. Invalid values are logged
//! and ignored.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::checkpoint::DEFAULT_CHECKPOINT_DIR;
use crate::replay::DEFAULT_REPLAY_PORT;
use crate::search::{DEFAULT_ACCEPT_LENGTH, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MAX_FRONTIER};

pub const ENV_CHECKPOINT_DIR: &str = "QWOP_CHECKPOINT_DIR";
pub const ENV_CHECKPOINT_SECS: &str = "QWOP_CHECKPOINT_SECS";
pub const ENV_MAX_FRONTIER: &str = "QWOP_MAX_FRONTIER";
pub const ENV_ACCEPT_LENGTH: &str = "QWOP_ACCEPT_LENGTH";
pub const ENV_REPLAY_PORT: &str = "QWOP_REPLAY_PORT";

/// Parses a strictly positive value, warning when `raw` is present but
/// unusable.
fn parse_positive<T>(name: &str, raw: Option<String>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw_value = raw?;
    match raw_value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Some(parsed),
        _ => {
            warn!("{name} must be a positive integer; got '{raw_value}'");
            None
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn resolve_checkpoint_dir() -> PathBuf {
    env_value(ENV_CHECKPOINT_DIR)
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR))
}

pub fn resolve_checkpoint_interval() -> Duration {
    parse_positive::<u64>(ENV_CHECKPOINT_SECS, env_value(ENV_CHECKPOINT_SECS))
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
}

pub fn resolve_max_frontier() -> usize {
    parse_positive(ENV_MAX_FRONTIER, env_value(ENV_MAX_FRONTIER)).unwrap_or(DEFAULT_MAX_FRONTIER)
}

pub fn resolve_accept_length() -> usize {
    parse_positive(ENV_ACCEPT_LENGTH, env_value(ENV_ACCEPT_LENGTH))
        .unwrap_or(DEFAULT_ACCEPT_LENGTH)
}

pub fn resolve_replay_port() -> u16 {
    parse_positive(ENV_REPLAY_PORT, env_value(ENV_REPLAY_PORT)).unwrap_or(DEFAULT_REPLAY_PORT)
}
