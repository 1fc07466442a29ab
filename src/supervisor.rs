//! Supervisor: the upstream reconnection loop
//!
//! Ported from `connect_with_retry`'s backoff bookkeeping in
//! `examples/original_source/mcp_pipe.py`. The original kept
//! `reconnect_attempt` and `backoff` as module-level globals; here they are
//! fields owned exclusively by [`Supervisor`] (`SPEC_FULL.md` §3, §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Mode;
use crate::connection::run_connection;
use crate::error::Result;

/// Initial backoff, in seconds (`SPEC_FULL.md` §4.1).
const INITIAL_BACKOFF_SECS: u64 = 1;
/// Backoff ceiling, in seconds.
const MAX_BACKOFF_SECS: u64 = 600;

/// Owns the reconnect attempt counter and current backoff interval across
/// the lifetime of the process.
pub struct Supervisor {
    endpoint: String,
    mode: Mode,
    client: Client,
    reconnect_attempt: u64,
    backoff_secs: u64,
}

impl Supervisor {
    /// Construct a new Supervisor for `endpoint`/`mode`.
    pub fn new(endpoint: String, mode: Mode) -> Self {
        Self {
            endpoint,
            mode,
            client: Client::new(),
            reconnect_attempt: 0,
            backoff_secs: INITIAL_BACKOFF_SECS,
        }
    }

    /// Run forever: attempt one connection episode, then on any failure wait
    /// `backoff * (1 + U(0, 0.1))` seconds and double the backoff (capped at
    /// [`MAX_BACKOFF_SECS`]). Returns only when `shutdown` fires.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            tracing::info!(
                endpoint = %self.endpoint,
                attempt = self.reconnect_attempt,
                "dialing upstream WebSocket"
            );

            let connected = Arc::new(AtomicBool::new(false));
            let on_connected = {
                let connected = Arc::clone(&connected);
                move || connected.store(true, Ordering::SeqCst)
            };

            let outcome = tokio::select! {
                outcome = run_connection(&self.endpoint, &self.mode, &self.client, on_connected) => outcome,
                _ = shutdown.cancelled() => return Ok(()),
            };

            if connected.load(Ordering::SeqCst) {
                self.reset();
            }

            match outcome {
                Ok(()) => {
                    tracing::info!("connection episode ended cleanly, reconnecting");
                }
                Err(error) => {
                    tracing::warn!(%error, "connection episode failed, reconnecting");
                }
            }

            self.reconnect_attempt += 1;
            let wait = self.next_backoff();

            tracing::info!(wait_secs = %format!("{wait:.2}"), "waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
        }
    }

    /// Compute this attempt's jittered backoff and double the stored backoff
    /// for next time.
    fn next_backoff(&mut self) -> f64 {
        let jitter: f64 = rand::rng().random_range(0.0..0.1);
        let wait = self.backoff_secs as f64 * (1.0 + jitter);
        self.backoff_secs = (self.backoff_secs * 2).min(MAX_BACKOFF_SECS);
        wait
    }

    /// Reset the attempt counter and backoff after a successful handshake
    /// (`SPEC_FULL.md` §4.1). Called the moment `run_connection` reports the
    /// WebSocket dial succeeded, not only once the whole episode ends, so a
    /// long-lived connection that eventually drops always restarts its
    /// backoff from `INITIAL_BACKOFF_SECS` rather than carrying over whatever
    /// the counter had climbed to on a previous, unrelated failure run.
    fn reset(&mut self) {
        self.reconnect_attempt = 0;
        self.backoff_secs = INITIAL_BACKOFF_SECS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut supervisor = Supervisor::new(
            "ws://example".to_string(),
            Mode::Stdio {
                script_path: "echo".to_string(),
                script_args: vec![],
            },
        );
        let mut observed = Vec::new();
        for _ in 0..12 {
            let wait = supervisor.next_backoff();
            observed.push(wait);
        }

        // Each jittered wait should be within [base, base * 1.1].
        let mut base = INITIAL_BACKOFF_SECS as f64;
        for wait in &observed {
            assert!(*wait >= base - f64::EPSILON);
            assert!(*wait <= base * 1.1 + f64::EPSILON);
            base = (base * 2.0).min(MAX_BACKOFF_SECS as f64);
        }

        // After enough doublings the backoff should sit at the cap.
        assert!(observed.last().unwrap() <= &(MAX_BACKOFF_SECS as f64 * 1.1));
    }

    #[test]
    fn test_reset_restores_initial_backoff() {
        let mut supervisor = Supervisor::new(
            "ws://example".to_string(),
            Mode::Stdio {
                script_path: "echo".to_string(),
                script_args: vec![],
            },
        );
        supervisor.next_backoff();
        supervisor.next_backoff();
        assert!(supervisor.backoff_secs > INITIAL_BACKOFF_SECS);
        supervisor.reset();
        assert_eq!(supervisor.backoff_secs, INITIAL_BACKOFF_SECS);
        assert_eq!(supervisor.reconnect_attempt, 0);
    }
}
