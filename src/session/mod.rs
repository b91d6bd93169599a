//! Session supervisor: SOCKS5 handshake, upstream dial, clamp install,
//! and the forward/return pump pair that moves bytes for the rest of the
//! connection's life.

pub mod pump;
pub mod socks5;

use std::os::fd::AsRawFd;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::core::clamp_table::{ClampGuard, ClampTable};
use crate::error::SessionError;

const PORT_HTTPS: u16 = 443;

/// Binds the SOCKS5 listener and accepts connections forever, spawning
/// one supervised session per accepted connection. Returns only on a
/// listener-level error (bind failure, or the accept loop itself
/// erroring out), both of which are fatal per the specification's
/// startup-failure policy.
pub async fn run_listener(config: Arc<Config>, clamp_table: Arc<ClampTable>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {e}", config.listen))?;

    tracing::info!(addr = %config.listen, "socks5 listener started");

    loop {
        let (inbound, peer) = listener.accept().await?;
        let config = Arc::clone(&config);
        let clamp_table = Arc::clone(&clamp_table);

        tokio::spawn(async move {
            tracing::debug!(%peer, "session accepted");
            match run_session(inbound, &config, &clamp_table).await {
                Ok(()) => tracing::debug!(%peer, "session ended"),
                Err(e) => tracing::warn!(%peer, kind = e.kind(), "session ended: {e}"),
            }
        });
    }
}

/// Runs one session end to end: handshake, dial, clamp install, pump
/// spawn, supervised teardown. Every error return here is local to this
/// session; nothing propagates to the listener or to other sessions.
async fn run_session(
    mut inbound: TcpStream,
    config: &Config,
    clamp_table: &Arc<ClampTable>,
) -> Result<(), SessionError> {
    socks5::negotiate_auth(&mut inbound).await?;
    let target = socks5::read_connect_request(&mut inbound).await?;

    let upstream = TcpStream::connect(&target.host_port)
        .await
        .map_err(|source| SessionError::ConnectFailed {
            addr: target.host_port.clone(),
            source,
        })?;
    upstream.set_nodelay(true).map_err(SessionError::Transport)?;

    // The flow the Packet Interceptor sees on the wire is the upstream
    // socket's outbound segments, so the clamp slot must be keyed by
    // *its* ephemeral local port, not the inbound socket's (which is
    // always this listener's own bind port for every session).
    let local_port = upstream
        .local_addr()
        .map_err(SessionError::Transport)?
        .port();

    // Invariant I2: only a flow dialing 443 ever gets a clamp; every
    // other flow still owns a (never-installed) guard so teardown is
    // uniform regardless of target port.
    let guard = ClampGuard::new(Arc::clone(clamp_table), local_port);
    if target.port == PORT_HTTPS {
        guard.install(config.window);
        tracing::debug!(local_port, "clamp installed for https flow");
    }

    let inbound = Arc::new(inbound);
    let upstream = Arc::new(upstream);
    let keywords = Arc::new(config.keywords.clone());

    let forward = tokio::spawn(pump::forward_pump(
        Arc::clone(&inbound),
        Arc::clone(&upstream),
        Arc::clone(clamp_table),
        local_port,
        keywords,
        config.packet_count,
    ));
    let return_ = tokio::spawn(pump::return_pump(
        Arc::clone(&upstream),
        Arc::clone(&inbound),
        Arc::clone(clamp_table),
        local_port,
        config.bytes_count,
    ));

    // Whichever pump finishes first force-closes both raw sockets so the
    // other pump's blocked read returns immediately, rather than waiting
    // out however long the peer stays silent. `ClampGuard` then clears
    // the slot on drop regardless of which branch ran.
    let result = tokio::select! {
        res = forward => {
            shutdown_both(&inbound, &upstream);
            flatten(res)
        }
        res = return_ => {
            shutdown_both(&inbound, &upstream);
            flatten(res)
        }
    };

    drop(guard);
    result
}

fn flatten(
    joined: Result<Result<(), SessionError>, tokio::task::JoinError>,
) -> Result<(), SessionError> {
    match joined {
        Ok(inner) => inner,
        Err(e) => Err(SessionError::Transport(std::io::Error::other(e))),
    }
}

/// Forces both directions of both sockets closed via a raw `shutdown(2)`
/// call. A plain `AsyncWriteExt::shutdown` only half-closes the write
/// side and would not unblock a peer task's pending read on the other
/// half of the same fd — a raw `SHUT_RDWR` does, because both directions
/// of one fd are shut down regardless of which in-process handle issued
/// the call.
fn shutdown_both(a: &TcpStream, b: &TcpStream) {
    raw_shutdown(a);
    raw_shutdown(b);
}

fn raw_shutdown(stream: &TcpStream) {
    let fd = stream.as_raw_fd();
    // Best-effort: the socket may already be closed or half-closed by the
    // peer, in which case this is a harmless no-op.
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_raw_shutdown_unblocks_a_pending_read() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let server = Arc::new(server);
        let blocked = Arc::clone(&server);
        let read_task = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            (&*blocked).read(&mut buf).await
        });

        // Give the read a moment to actually start blocking.
        tokio::task::yield_now().await;
        raw_shutdown(&server);

        let result = read_task.await.unwrap();
        assert!(result.is_ok(), "shutdown should unblock the read, not error it");
        assert_eq!(result.unwrap(), 0, "unblocked read observes EOF");

        drop(client);
    }

    #[tokio::test]
    async fn test_async_shutdown_alone_does_not_unblock_peer_read() {
        // Documents the pitfall this module's raw-shutdown design avoids:
        // a write-half-only async shutdown does not affect a concurrent
        // reader on the *other* socket of the pair.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        // Shutting down the client's write side has no effect on whether
        // the *server* can still read (it can: the client's read side,
        // not used here, is untouched, and the server already got FIN,
        // which is a legitimate 0-byte EOF read, not a hang) -- this test
        // exists to document intent rather than assert a hang.
        client.shutdown().await.unwrap();
        drop(server);
    }
}
