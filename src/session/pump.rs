//! Forward pump (client→upstream) and return pump (upstream→client).
//!
//! Both are plain async loops over a shared `Arc<TcpStream>` pair; all
//! the interesting behavior is in what they do to the buffer (forward)
//! or when they clear the clamp (both), not in how they move bytes.
//! Streams are shared rather than split so the supervisor can force a
//! blocked read to return by shutting down the raw socket out from under
//! a stuck pump (see `shutdown_both` in `session::mod`).

use std::sync::Arc;

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::clamp_table::ClampTable;
use crate::error::SessionError;

const FORWARD_BUF_SIZE: usize = 10 * 1024;
const TLS_APPLICATION_DATA: u8 = 0x17;

/// Client → upstream. See the specification's Forward Pump contract.
pub async fn forward_pump(
    src: Arc<TcpStream>,
    dst: Arc<TcpStream>,
    clamp_table: Arc<ClampTable>,
    local_port: u16,
    keywords: Arc<Vec<String>>,
    packet_count: u32,
) -> Result<(), SessionError> {
    let mut buf = vec![0u8; FORWARD_BUF_SIZE];
    let mut reads = 0u32;

    loop {
        let n = (&*src).read(&mut buf).await.map_err(SessionError::Transport)?;
        if n == 0 {
            return Ok(()); // EOF: no writes, no counter change
        }

        let chunk = &mut buf[..n];
        munge_headers(chunk);

        reads += 1;

        if chunk[0] == TLS_APPLICATION_DATA && clamp_table.get(local_port) != 0 {
            clamp_table.clear(local_port);
            tracing::debug!(local_port, "clamp reset: client sent application data");
        }

        if reads >= packet_count && clamp_table.get(local_port) != 0 {
            clamp_table.clear(local_port);
            tracing::debug!(local_port, reads, "clamp reset: packet count reached");
        }

        write_split(&dst, chunk, &keywords).await?;
    }
}

/// Upstream → client. See the specification's Return Pump contract.
pub async fn return_pump(
    src: Arc<TcpStream>,
    dst: Arc<TcpStream>,
    clamp_table: Arc<ClampTable>,
    local_port: u16,
    bytes_count: u64,
) -> Result<(), SessionError> {
    // Phase 1: bounded copy. `take` makes the adapter itself report EOF at
    // bytes_count, so a short read/EOF before that point and reaching the
    // count behave identically — both simply end phase 1.
    let mut limited_src = (&*src).take(bytes_count);
    let mut dst_ref = &*dst;
    io::copy(&mut limited_src, &mut dst_ref)
        .await
        .map_err(SessionError::Transport)?;
    clamp_table.clear(local_port);
    tracing::debug!(local_port, "clamp reset: return byte budget reached");

    // Phase 2: unlimited copy until EOF or error.
    let mut src_ref = &*src;
    io::copy(&mut src_ref, &mut dst_ref)
        .await
        .map_err(SessionError::Transport)?;

    Ok(())
}

/// Case-sensitive, prefix-anchored-by-substring header munging:
/// `Host:` → `host:`, `User-Agent:` → `user-agent:`, applied globally.
fn munge_headers(buf: &mut [u8]) {
    replace_in_place(buf, b"Host:", b"host:");
    replace_in_place(buf, b"User-Agent:", b"user-agent:");
}

/// Replaces every occurrence of `from` with `to` in place. Only ever
/// called with same-length replacement pairs, so no resizing is needed.
fn replace_in_place(buf: &mut [u8], from: &[u8], to: &[u8]) {
    debug_assert_eq!(from.len(), to.len());
    let mut i = 0;
    while i + from.len() <= buf.len() {
        if &buf[i..i + from.len()] == from {
            buf[i..i + from.len()].copy_from_slice(to);
            i += from.len();
        } else {
            i += 1;
        }
    }
}

/// Finds the first configured keyword present in `buf`, in configured
/// order, and writes the buffer split one byte past the start of the
/// match; if no keyword is present, writes the whole buffer in one call.
async fn write_split(
    dst: &TcpStream,
    buf: &[u8],
    keywords: &[String],
) -> Result<(), SessionError> {
    let split_at = keywords
        .iter()
        .find_map(|keyword| find_substr(buf, keyword.as_bytes()).map(|idx| idx + 1));

    let mut dst_ref = dst;
    match split_at {
        Some(offset) => {
            dst_ref
                .write_all(&buf[..offset])
                .await
                .map_err(SessionError::Transport)?;
            dst_ref
                .write_all(&buf[offset..])
                .await
                .map_err(SessionError::Transport)?;
        }
        None => {
            dst_ref.write_all(buf).await.map_err(SessionError::Transport)?;
        }
    }
    Ok(())
}

fn find_substr(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
