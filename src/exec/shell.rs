// src/exec/shell.rs

//! Built-in `shell` job type: run `config.cmd` through the system shell.
//!
//! Config entries:
//! - `cmd` (required): command line passed to `sh -c` (`cmd /C` on Windows)
//! - `cwd`: working directory
//! - `env`: table of extra environment variables
//!
//! Every stdout/stderr line is appended to the job log. If the last
//! non-empty stdout line is a JSON object it becomes the job output, which
//! lets a training script report metrics for a fan-in.

use std::process::Stdio;

use anyhow::{Context, anyhow, bail};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exec::handler::{HandlerFuture, JobContext, JobHandler};

/// Job type under which the CLI registers [`ShellHandler`].
pub const SHELL_JOB_TYPE: &str = "shell";

#[derive(Debug, Clone, Copy, Default)]
pub struct ShellHandler;

impl JobHandler for ShellHandler {
    fn run(&self, ctx: JobContext) -> HandlerFuture {
        Box::pin(run_shell(ctx))
    }
}

async fn run_shell(ctx: JobContext) -> anyhow::Result<Value> {
    let cmd_line = ctx
        .config_str("cmd")
        .ok_or_else(|| anyhow!("job '{}' has no string `cmd` config entry", ctx.job_id()))?
        .to_string();

    info!(job = %ctx.job_id(), attempt = ctx.attempt(), cmd = %cmd_line, "starting shell command");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&cmd_line);
        c
    };

    if let Some(cwd) = ctx.config_str("cwd") {
        cmd.current_dir(cwd);
    }
    if let Some(env) = ctx.config().get("env").and_then(Value::as_object) {
        for (key, value) in env {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            cmd.env(key, value);
        }
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning `{cmd_line}` for job '{}'", ctx.job_id()))?;

    let stdout_task = child.stdout.take().map(|out| forward_lines(out, ctx.clone(), ""));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| forward_lines(err, ctx.clone(), "stderr: "));

    let status = tokio::select! {
        status = child.wait() => {
            status.with_context(|| format!("waiting for `{cmd_line}` of job '{}'", ctx.job_id()))?
        }
        _ = ctx.cancelled() => {
            info!(job = %ctx.job_id(), "cancellation requested; killing shell command");
            if let Err(e) = child.kill().await {
                warn!(job = %ctx.job_id(), error = %e, "failed to kill shell command on cancellation");
            }
            bail!("cancelled");
        }
    };

    let last_line = match stdout_task {
        Some(task) => task.await.unwrap_or_default(),
        None => None,
    };
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    if !status.success() {
        match status.code() {
            Some(code) => bail!("command exited with status {code}"),
            None => bail!("command terminated by signal"),
        }
    }

    debug!(job = %ctx.job_id(), "shell command succeeded");
    Ok(output_from_last_line(last_line))
}

/// Forward every line of `reader` to the job log; resolve to the last
/// non-empty line.
fn forward_lines<R>(reader: R, ctx: JobContext, prefix: &'static str) -> JoinHandle<Option<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                last = Some(line.clone());
            }
            ctx.log(format!("{prefix}{line}")).await;
        }
        last
    })
}

fn output_from_last_line(last_line: Option<String>) -> Value {
    let parsed = last_line
        .as_deref()
        .and_then(|line| serde_json::from_str::<Value>(line.trim()).ok());
    match parsed {
        Some(obj @ Value::Object(_)) => obj,
        _ => json!({ "exit_code": 0, "last_line": last_line }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::engine::RuntimeEvent;

    #[test]
    fn json_object_on_last_line_becomes_output() {
        assert_eq!(
            output_from_last_line(Some(r#" {"eval_loss": 0.42} "#.to_string())),
            json!({ "eval_loss": 0.42 })
        );
        assert_eq!(
            output_from_last_line(Some("[1, 2]".to_string())),
            json!({ "exit_code": 0, "last_line": "[1, 2]" })
        );
        assert_eq!(
            output_from_last_line(None),
            json!({ "exit_code": 0, "last_line": null })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_command_and_logs_output() {
        let (tx, mut rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut config = BTreeMap::new();
        config.insert(
            "cmd".to_string(),
            json!(r#"echo training; echo oops >&2; echo '{"acc": 0.91}'"#),
        );
        let ctx = JobContext::new("train".into(), "train".into(), 1, config, tx, cancel_rx);

        let output = ShellHandler.run(ctx).await.unwrap();
        assert_eq!(output, json!({ "acc": 0.91 }));

        let mut lines = Vec::new();
        while let Ok(RuntimeEvent::JobLog { line, .. }) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.contains(&"training".to_string()));
        assert!(lines.contains(&"stderr: oops".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let (tx, _rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut config = BTreeMap::new();
        config.insert("cmd".to_string(), json!("exit 3"));
        let ctx = JobContext::new("bad".into(), "bad".into(), 1, config, tx, cancel_rx);

        let err = ShellHandler.run(ctx).await.unwrap_err();
        assert!(err.to_string().contains("status 3"));
    }

    #[tokio::test]
    async fn missing_cmd_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = JobContext::new("x".into(), "x".into(), 1, BTreeMap::new(), tx, cancel_rx);
        assert!(ShellHandler.run(ctx).await.is_err());
    }
}
