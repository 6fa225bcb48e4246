pub mod decode;
pub mod normalize;
mod pump;
pub mod telnet;
pub mod transcript;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use transcript::Transcript;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

/// Timing policy for the session. Values come from [`crate::config::Config`];
/// tests shrink them to keep the suite fast.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    /// Bound on TCP connection establishment.
    pub connect_timeout: Duration,
    /// How long to let the server's greeting accumulate before draining it.
    pub greeting_settle: Duration,
    /// How long to let a command's response accumulate before draining it.
    pub send_settle: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            greeting_settle: Duration::from_secs(2),
            send_settle: Duration::from_millis(500),
        }
    }
}

pub(crate) struct SessionState {
    pub(crate) phase: Phase,
    /// Bumped on every transition into Connecting and on disconnect; a pump
    /// task carries the generation it was spawned with and refuses to append
    /// once they diverge.
    pub(crate) generation: u64,
    pub(crate) transcript: Transcript,
    pub(crate) pump: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) wake: Notify,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One TCP session against a MUD server.
///
/// A single pump task turns inbound bytes into transcript text; callers pull
/// that text out with [`read_output`](Self::read_output) (a long-poll) or via
/// the settle-then-drain pattern used by [`connect`](Self::connect) and
/// [`send_command`](Self::send_command). One lock guards the phase machine
/// and the transcript so "append + wake" and "check + drain" are atomic with
/// respect to each other. At most one long-poll is expected to be outstanding
/// at a time; that is a usage precondition, not something enforced here.
pub struct MudSession {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    timing: SessionTiming,
}

impl MudSession {
    pub fn new(timing: SessionTiming) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState {
                    phase: Phase::Disconnected,
                    generation: 0,
                    transcript: Transcript::new(),
                    pump: None,
                }),
                wake: Notify::new(),
            }),
            writer: tokio::sync::Mutex::new(None),
            timing,
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    /// Connects to `host:port`, waits for the greeting to settle, and
    /// returns it. The transcript, filter state, and cursor all start fresh.
    pub async fn connect(&self, host: &str, port: u16) -> Result<String, SessionError> {
        let generation = {
            let mut state = self.shared.lock();
            if state.phase != Phase::Disconnected {
                return Err(SessionError::AlreadyConnected);
            }
            state.phase = Phase::Connecting;
            state.generation += 1;
            state.transcript.reset();
            state.generation
        };

        let stream = match time::timeout(
            self.timing.connect_timeout,
            TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(host, port, error = %err, "connect failed");
                self.shared.lock().phase = Phase::Disconnected;
                return Err(SessionError::Io(err));
            }
            Err(_) => {
                warn!(host, port, "connect timed out");
                self.shared.lock().phase = Phase::Disconnected;
                return Err(SessionError::ConnectTimeout(self.timing.connect_timeout));
            }
        };

        info!(host, port, "connected to mud server");
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let handle = tokio::spawn(pump::run(Arc::clone(&self.shared), read_half, generation));
        {
            let mut state = self.shared.lock();
            state.phase = Phase::Connected;
            state.pump = Some(handle);
        }

        // Greeting banners arrive as several writes; give them a moment to
        // settle, then hand back everything that arrived.
        time::sleep(self.timing.greeting_settle).await;
        Ok(self.drain_now())
    }

    /// Tears the connection down and clears all per-connection state. A
    /// pending long-poll is released.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let pump = {
            let mut state = self.shared.lock();
            if state.phase == Phase::Disconnected {
                return Err(SessionError::NotConnected);
            }
            state.phase = Phase::Disconnected;
            state.generation += 1;
            state.transcript.reset();
            state.pump.take()
        };
        *self.writer.lock().await = None;
        if let Some(handle) = pump {
            handle.abort();
        }
        self.shared.wake.notify_one();
        info!("disconnected from mud server");
        Ok(())
    }

    /// Sends one command line, waits for the response window to settle, and
    /// returns whatever accumulated, including unrelated asynchronous output.
    pub async fn send_command(&self, command: &str) -> Result<String, SessionError> {
        if self.shared.lock().phase != Phase::Connected {
            return Err(SessionError::NotConnected);
        }
        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(SessionError::NotConnected)?;
            writer.write_all(command.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
            writer.flush().await?;
        }
        debug!(command, "sent command");
        time::sleep(self.timing.send_settle).await;
        Ok(self.drain_now())
    }

    /// Long-poll for new output.
    ///
    /// Returns immediately if unread text exists. Otherwise waits until the
    /// pump appends something or `window` elapses, then drains once more; an
    /// empty result after the window is "no new output", not an error. A
    /// disconnect while waiting releases the poll with whatever text exists.
    pub async fn read_output(&self, window: Duration) -> Result<String, SessionError> {
        {
            let mut state = self.shared.lock();
            if state.phase != Phase::Connected {
                return Err(SessionError::NotConnected);
            }
            if state.transcript.has_unread() {
                return Ok(state.transcript.drain());
            }
        }

        let deadline = Instant::now() + window;
        loop {
            // Register interest before re-checking: a wake that lands between
            // the check and the await is retained by the Notify permit.
            let notified = self.shared.wake.notified();
            {
                let mut state = self.shared.lock();
                if state.transcript.has_unread() || state.phase != Phase::Connected {
                    return Ok(state.transcript.drain());
                }
            }
            if time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.drain_now());
            }
        }
    }

    /// Drains whatever is unread without waiting.
    pub fn drain_now(&self) -> String {
        self.shared.lock().transcript.drain()
    }
}

impl Drop for MudSession {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.lock().pump.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_timing() -> SessionTiming {
        SessionTiming {
            connect_timeout: Duration::from_millis(500),
            greeting_settle: Duration::from_millis(50),
            send_settle: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn read_while_disconnected_is_rejected() {
        let session = MudSession::new(quick_timing());
        let err = session.read_output(Duration::from_millis(10)).await;
        assert!(matches!(err, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn send_while_disconnected_is_rejected() {
        let session = MudSession::new(quick_timing());
        let err = session.send_command("look").await;
        assert!(matches!(err, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_while_disconnected_is_rejected() {
        let session = MudSession::new(quick_timing());
        assert!(matches!(
            session.disconnect().await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_times_out_against_unroutable_address() {
        let timing = SessionTiming {
            connect_timeout: Duration::from_millis(100),
            ..quick_timing()
        };
        let session = MudSession::new(timing);
        // RFC 5737 TEST-NET-1 address; nothing routes there.
        let result = session.connect("192.0.2.1", 4000).await;
        assert!(matches!(
            result,
            Err(SessionError::ConnectTimeout(_)) | Err(SessionError::Io(_))
        ));
        assert_eq!(session.phase(), Phase::Disconnected);
    }
}
