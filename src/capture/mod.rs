//! The packet interceptor: an NFQUEUE callback loop that clamps the TCP
//! receive window on outbound segments of clamped flows.
//!
//! Runs on its own named OS thread, mirroring the one-thread-per-capture-
//! backend shape this corpus uses elsewhere for blocking packet I/O —
//! `nfq`'s `Queue::recv` is a blocking netlink `recvmsg`, not an async
//! operation, so it cannot live on the Tokio runtime alongside the
//! session pumps.

pub mod packet;

use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use nfq::{Queue, Verdict as NfVerdict};

use crate::core::clamp_table::ClampTable;

use self::packet::{inspect, Verdict};

const MAX_PACKET_LEN: u32 = 0xFF_FFFF; // ~16 MiB, enough for jumbo frames
const MAX_QUEUE_LEN: u32 = 0xFF;
const WRITE_TIMEOUT_MS: u64 = 100;

// SOL_NETLINK / NETLINK_NO_ENOBUFS are not exposed by `libc` on every
// target, so the raw numeric values are used directly, matching the
// original implementation's own raw `syscall.SetsockoptInt` call.
const SOL_NETLINK: libc::c_int = 270;
const NETLINK_NO_ENOBUFS: libc::c_int = 5;

/// Owns the interceptor's background thread. Dropping it requests
/// shutdown; it does not block waiting for the thread to exit (the
/// thread's next `recv` timeout or next packet will observe the flag).
pub struct PacketInterceptor {
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl PacketInterceptor {
    /// Open the NFQUEUE identified by `queue_num` and start the callback
    /// loop on a dedicated thread. A failure to open the queue is fatal
    /// per the specification's queue-fatal policy and is returned here
    /// rather than from inside the thread, so `main` can log it and exit
    /// before any session traffic flows.
    pub fn start(queue_num: u16, clamp_table: Arc<ClampTable>) -> Result<Self> {
        let mut queue = open_queue(queue_num)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = std::thread::Builder::new()
            .name("nfqueue-interceptor".into())
            .spawn(move || run_loop(&mut queue, &clamp_table, &shutdown_clone))
            .context("failed to spawn nfqueue interceptor thread")?;

        tracing::info!(queue_num, "packet interceptor started");

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for PacketInterceptor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn open_queue(queue_num: u16) -> Result<Queue> {
    let mut queue = Queue::open().context("failed to open nfqueue socket")?;
    queue
        .bind(queue_num.into())
        .with_context(|| format!("failed to bind nfqueue {queue_num}"))?;
    queue
        .set_copy_range(queue_num.into(), MAX_PACKET_LEN)
        .context("failed to set nfqueue copy range")?;
    queue
        .set_queue_max_len(queue_num.into(), MAX_QUEUE_LEN)
        .context("failed to set nfqueue max length")?;
    queue.set_recv_conntrack(queue_num.into(), false).ok();

    disable_enobufs(&queue).context("failed to disable NETLINK_NO_ENOBUFS")?;

    Ok(queue)
}

/// Disable ENOBUFS notifications on the queue's underlying netlink
/// socket so that a burst of packets does not kill the callback loop —
/// the same `SOL_NETLINK`/`NETLINK_NO_ENOBUFS` dance the original does
/// through a raw `syscall.SetsockoptInt`.
fn disable_enobufs(queue: &Queue) -> Result<()> {
    let fd = queue.as_raw_fd();
    let value: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            SOL_NETLINK,
            NETLINK_NO_ENOBUFS,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn run_loop(queue: &mut Queue, clamp_table: &ClampTable, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        let mut msg = match queue.recv() {
            Ok(msg) => msg,
            Err(e) => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                // A fatal queue error (socket closed, kernel module
                // missing) is not recoverable — honoring the evasion
                // contract only partially would be worse than crashing.
                tracing::error!("nfqueue recv error: {e:#}, terminating");
                std::process::exit(1);
            }
        };

        let payload = msg.get_payload();
        match inspect(payload, |port| clamp_table.get(port)) {
            Ok(Verdict::Unchanged) => {
                msg.set_verdict(NfVerdict::Accept);
            }
            Ok(Verdict::Replace(new_bytes)) => {
                msg.set_payload(new_bytes);
                msg.set_verdict(NfVerdict::Accept);
            }
            Err(e) => {
                tracing::warn!("packet rewrite failed, forwarding unchanged: {e}");
                msg.set_verdict(NfVerdict::Accept);
            }
        }

        if let Err(e) = queue.verdict(msg) {
            tracing::warn!("failed to issue verdict within {WRITE_TIMEOUT_MS}ms: {e}");
        }
    }
}
