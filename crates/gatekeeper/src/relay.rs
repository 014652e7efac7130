//! Bidirectional byte relay between two connected streams
//!
//! A [`Relay`] moves through `Idle -> Piping -> Terminated` exactly once.
//! One direction runs on a spawned task, the other on the caller's task.
//! Whichever direction ends first flips the shared state to `Terminated`,
//! and the other direction observes that even while parked on a read or
//! write, so both sides wind down together.

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Size of the per-direction copy buffer
pub const RELAY_BUFFER_SIZE: usize = 2048;

/// Lifecycle of a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Piping,
    Terminated,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelayState::Idle => "idle",
            RelayState::Piping => "piping",
            RelayState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Bytes moved by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the first stream to the second
    pub a_to_b: u64,
    /// Bytes copied from the second stream to the first
    pub b_to_a: u64,
}

/// Bidirectional relay between two streams
#[derive(Debug)]
pub struct Relay {
    state: Arc<watch::Sender<RelayState>>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RelayState::Idle);
        Self {
            state: Arc::new(state),
        }
    }

    /// Current state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == RelayState::Terminated
    }

    /// Force the relay into `Terminated`
    ///
    /// Both directions exit at their next suspension point. The streams
    /// themselves are released when [`Relay::start`] returns.
    pub fn stop(&self) {
        self.state.send_replace(RelayState::Terminated);
    }

    /// Relay bytes between `conn_a` and `conn_b` until either side closes or errors
    ///
    /// `conn_a -> conn_b` runs on a spawned task while `conn_b -> conn_a`
    /// runs here. Returns once both directions have stopped; both streams
    /// are dropped (and so closed) by then. A relay that has already left
    /// `Idle` does nothing and reports zero bytes.
    pub async fn start<A, B>(&self, conn_a: A, conn_b: B) -> RelayStats
    where
        A: AsyncRead + AsyncWrite + Send + 'static,
        B: AsyncRead + AsyncWrite + Send + 'static,
    {
        let entered = self.state.send_if_modified(|state| {
            if *state == RelayState::Idle {
                *state = RelayState::Piping;
                true
            } else {
                false
            }
        });
        if !entered {
            debug!(state = %self.state(), "relay already started, ignoring");
            return RelayStats::default();
        }

        let (a_read, a_write) = tokio::io::split(conn_a);
        let (b_read, b_write) = tokio::io::split(conn_b);

        let forward = tokio::spawn(pipe(a_read, b_write, self.state.clone()));
        let b_to_a = pipe(b_read, a_write, self.state.clone()).await;

        let a_to_b = match forward.await {
            Ok(copied) => copied,
            Err(e) => {
                warn!("relay direction task failed: {}", e);
                0
            }
        };

        RelayStats { a_to_b, b_to_a }
    }
}

/// Copy `reader` into `writer` until EOF, an error, or termination of the relay
async fn pipe<R, W>(mut reader: R, mut writer: W, state: Arc<watch::Sender<RelayState>>) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut terminated = state.subscribe();
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut copied = 0u64;

    while *terminated.borrow_and_update() == RelayState::Piping {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log_copy_error("read", &e);
                    break;
                }
            },
            _ = terminated.changed() => break,
        };

        tokio::select! {
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    log_copy_error("write", &e);
                    break;
                }
            }
            _ = terminated.changed() => break,
        }

        copied += n as u64;
    }

    state.send_replace(RelayState::Terminated);
    copied
}

fn log_copy_error(op: &str, e: &io::Error) {
    if is_connection_closed_error(e) {
        debug!("relay {} ended: {}", op, e);
    } else {
        warn!("relay {} failed: {}", op, e);
    }
}

/// Check if an error is just a connection closed error
fn is_connection_closed_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}
