use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Timing policy and storage locations, loaded from the environment.
///
/// The settle windows are deliberate: a MUD pushes output whenever it likes,
/// so "the response to a command" is really "whatever arrived shortly after
/// the command". Defaults match the behaviour players expect from a manual
/// telnet client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bound on TCP connection establishment.
    pub connect_timeout: Duration,
    /// How long to let the greeting banner accumulate after connecting.
    pub greeting_settle: Duration,
    /// How long to let a command's response accumulate before draining.
    pub send_settle: Duration,
    /// Default long-poll window for `mud_read`.
    pub read_timeout: Duration,
    /// Override for the character memory directory.
    pub memory_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            connect_timeout: env_ms("MUDGATE_CONNECT_TIMEOUT_MS", 10_000),
            greeting_settle: env_ms("MUDGATE_GREETING_SETTLE_MS", 2_000),
            send_settle: env_ms("MUDGATE_SEND_SETTLE_MS", 500),
            read_timeout: env_ms("MUDGATE_READ_TIMEOUT_MS", 5_000),
            memory_dir: env::var("MUDGATE_MEMORY_DIR").ok().map(PathBuf::from),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            greeting_settle: Duration::from_millis(2_000),
            send_settle: Duration::from_millis(500),
            read_timeout: Duration::from_millis(5_000),
            memory_dir: None,
        }
    }
}

fn env_ms(var: &str, default: u64) -> Duration {
    let millis = env::var(var)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_millis(millis)
}
