//! stdio downstream mode
//!
//! Spawns the configured child process and wires its stdin/stdout/stderr to
//! the Connection Context, per `SPEC_FULL.md` §4.3. Adapted from the
//! teacher's `StdioTransport` (see
//! `examples/xbcsmith-xzatoma/src/mcp/transport/stdio.rs`), generalized from
//! a generic `Transport` impl used by an MCP *client* into the bridge's own
//! WS-ingress/egress task pair plumbed straight into the shared
//! [`ResponseQueue`] and [`CorrelationTable`].

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};
use crate::queue::{CorrelationTable, ResponseQueue};
use crate::rpc::Envelope;

/// Grace period given to the child after `terminate` before `kill`
/// (`SPEC_FULL.md` §4.2, §5 "child terminate grace").
const TERMINATE_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Run the stdio mode for one connection episode: spawn the child, pipe WS
/// ingress to its stdin, its stdout to the Response Queue, and its stderr to
/// the local terminal. Returns once any of the four tasks ends, after
/// terminating the child.
pub async fn run(
    executable: String,
    args: Vec<String>,
    mut ws_rx: mpsc::UnboundedReceiver<String>,
    queue: Arc<ResponseQueue>,
    correlation: Arc<CorrelationTable>,
) -> Result<()> {
    let mut child = Command::new(&executable)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            BridgeError::Transport(format!("failed to spawn child `{executable}`: {e}"))
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| BridgeError::Transport("child stdin unavailable after spawn".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeError::Transport("child stdout unavailable after spawn".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeError::Transport("child stderr unavailable after spawn".to_string()))?;

    let stdin_task = {
        let correlation = Arc::clone(&correlation);
        tokio::spawn(async move {
            while let Some(message) = ws_rx.recv().await {
                if let Some(envelope) = Envelope::parse(&message) {
                    if let (Some(tool_name), Some(id)) =
                        (envelope.tool_call_name(), envelope.id.as_ref())
                    {
                        correlation
                            .insert(id.to_string(), tool_name)
                            .await;
                    }
                }
                let line = format!("{message}\n");
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            Ok::<(), BridgeError>(())
        })
    };

    let stdout_task = {
        let queue = Arc::clone(&queue);
        let correlation = Arc::clone(&correlation);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.unwrap_or(None) {
                if line.is_empty() {
                    continue;
                }
                if let Some(envelope) = Envelope::parse(&line) {
                    if let Some(id) = &envelope.id {
                        if let Some(tool_name) = correlation.remove(&id.to_string()).await {
                            tracing::debug!(tool_name, "correlated tool-call response");
                        }
                    }
                }
                if let Err(error) = queue.add(line).await {
                    tracing::warn!(%error, "failed to enqueue child stdout line");
                }
            }
            Ok::<(), BridgeError>(())
        })
    };

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await.unwrap_or(None) {
            tracing::info!(target: "mcp_pipe::child_stderr", "{line}");
        }
        Ok::<(), BridgeError>(())
    });

    let result = tokio::select! {
        result = stdin_task => join_result(result),
        result = stdout_task => join_result(result),
        result = stderr_task => join_result(result),
    };

    terminate_child(&mut child).await;
    result
}

fn join_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(inner) => inner,
        Err(join_error) => Err(BridgeError::Transport(format!(
            "stdio pipe task panicked: {join_error}"
        ))),
    }
}

async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
