//! Captured output handling

use std::process::ExitStatus;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

/// Decode captured bytes, cutting them at `max_bytes` with a trailing notice.
///
/// The cut moves back to the start of a split UTF-8 sequence so the kept
/// prefix decodes cleanly.
pub fn truncate_output(raw: &[u8], max_bytes: usize) -> String {
    if raw.len() <= max_bytes {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let mut cut = max_bytes;
    while cut > 0 && is_continuation(raw[cut]) {
        cut -= 1;
    }
    let mut text = String::from_utf8_lossy(&raw[..cut]).into_owned();
    text.push_str(&format!("\n[output truncated at {} bytes]", max_bytes));
    text
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Read at most `cap` bytes from `reader`, then discard the rest until EOF.
///
/// Keeps a child's pipe drained without buffering more than `cap`.
pub async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    (&mut reader).take(cap as u64).read_to_end(&mut kept).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(kept)
}

async fn read_pipe<R>(pipe: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(pipe) => read_capped(pipe, cap).await,
        None => Ok(Vec::new()),
    }
}

/// Exit status plus the captured head of each stream
#[derive(Debug)]
pub struct CappedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Wait for `child` while draining its piped stdout and stderr.
///
/// Each stream keeps one byte past `max_bytes`, enough for
/// [`truncate_output`] to tell that it was cut.
pub async fn wait_capped(child: &mut Child, max_bytes: usize) -> std::io::Result<CappedOutput> {
    let cap = max_bytes.saturating_add(1);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) =
        tokio::try_join!(read_pipe(stdout, cap), read_pipe(stderr, cap), child.wait())?;
    Ok(CappedOutput {
        status,
        stdout,
        stderr,
    })
}
