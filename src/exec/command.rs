// src/exec/command.rs

//! Shell-command task bodies, as used by the manifest runner.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::task::{Operation, operation};

/// Build the platform shell invocation for `cmd`.
fn shell_command(cmd: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
}

/// An [`Operation`] that runs `cmd` through the shell and yields its stdout.
///
/// A non-zero exit status is a failure. Each attempt spawns a fresh process;
/// the process is killed if the attempt is dropped (e.g. on timeout).
pub fn shell_operation(task: impl Into<String>, cmd: impl Into<String>) -> Operation<String> {
    let task = task.into();
    let cmd = cmd.into();
    operation(move || run_shell(task.clone(), cmd.clone()))
}

/// Run one shell command to completion, capturing stdout and logging stderr.
pub async fn run_shell(task: String, cmd: String) -> Result<String> {
    info!(task = %task, cmd = %cmd, "starting task process");

    let mut command = shell_command(&cmd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("spawning process for task '{task}'"))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, _, status) = tokio::join!(
        collect_lines(&task, "stdout", stdout),
        collect_lines(&task, "stderr", stderr),
        child.wait(),
    );
    let status = status.with_context(|| format!("waiting for process of task '{task}'"))?;

    let code = status.code().unwrap_or(-1);
    info!(task = %task, exit_code = code, success = status.success(), "task process exited");

    if !status.success() {
        bail!("command `{cmd}` exited with status {code}");
    }
    Ok(stdout)
}

/// Drain a child pipe to EOF line by line, logging each line at debug.
///
/// Lines are decoded lossily so non-UTF-8 output never stops the drain.
async fn collect_lines<R>(task: &str, stream: &str, pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut out = String::new();
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(task = %task, "{stream}: {line}");
                out.push_str(line);
                out.push('\n');
            }
            Err(err) => {
                warn!(task = %task, error = %err, "failed reading {stream}; output truncated");
                break;
            }
        }
    }
    out
}
