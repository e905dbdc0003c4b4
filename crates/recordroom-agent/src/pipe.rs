//! Pipes text input into the capture stream, one console event per line.

use recordroom_core::ConsoleCapture;
use recordroom_types::ConsoleLevel;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Parse a console level name for the command line.
pub fn parse_console_level(s: &str) -> Result<ConsoleLevel, String> {
    match s.to_lowercase().as_str() {
        "log" | "info" => Ok(ConsoleLevel::Log),
        "warn" | "warning" => Ok(ConsoleLevel::Warn),
        "error" => Ok(ConsoleLevel::Error),
        _ => Err(format!(
            "Invalid console level: '{}'. Use 'log', 'warn' or 'error'.",
            s
        )),
    }
}

/// Read `input` to the end, recording each non-empty line at `level`.
///
/// Lines are copied to `echo` when given. Returns the number of lines handed to
/// the console source, which drops them while it is not installed.
pub async fn pipe_lines<R, W>(
    input: R,
    mut echo: Option<W>,
    console: &ConsoleCapture,
    level: ConsoleLevel,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut recorded = 0;

    while let Some(line) = lines.next_line().await? {
        if let Some(out) = echo.as_mut() {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }

        if line.trim().is_empty() {
            continue;
        }
        console.record(level, line.as_str());
        recorded += 1;
        trace!(target: "recordroom_agent", "Recorded line {}", recorded);
    }

    Ok(recorded)
}
