//! Running external tools with their output streamed line by line.

use std::collections::VecDeque;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::progress::Reporter;

/// Lines kept per stream for failure diagnostics.
const TAIL_LINES: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub code: Option<i32>,
    /// Last lines of stdout followed by the last lines of stderr.
    pub tail: Vec<String>,
}

impl CommandOutcome {
    pub fn output_mentions(&self, needle: &str) -> bool {
        self.tail.iter().any(|line| line.contains(needle))
    }

    /// Short failure description for error payloads.
    pub fn summary(&self) -> String {
        let last = self
            .tail
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(String::as_str)
            .unwrap_or("");
        match self.code {
            Some(code) => format!("exit code {}: {}", code, last),
            None => format!("terminated by signal: {}", last),
        }
    }
}

/// Build a command the way the launcher always runs tools: no console window
/// on Windows, killed if the future is dropped.
pub fn tool_command(program: impl AsRef<std::ffi::OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW.0);
    }

    cmd
}

/// Run `cmd`, forwarding every stdout/stderr line to `reporter` as it
/// arrives. Spawn failures are errors; a non-zero exit is reported through
/// [`CommandOutcome::success`].
pub async fn run_streaming(cmd: &mut Command, reporter: &Reporter) -> Result<CommandOutcome> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AppError::process(format!("Failed to run {}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::process("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::process("Failed to capture stderr"))?;

    let (mut out_tail, err_tail) = tokio::join!(
        forward_lines(stdout, reporter),
        forward_lines(stderr, reporter)
    );

    let status = child
        .wait()
        .await
        .map_err(|e| AppError::process(format!("Failed to wait for {}: {}", program, e)))?;

    out_tail.extend(err_tail);
    Ok(CommandOutcome {
        success: status.success(),
        code: status.code(),
        tail: out_tail.into(),
    })
}

/// Tools print in the user's locale, so bytes are decoded lossily and the
/// pipe is drained to EOF whatever they contain.
async fn forward_lines<R>(stream: R, reporter: &Reporter) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::debug!("Output stream closed early: {}", e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        reporter.log(line.clone());
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}
