//! mcqfw: a local SOCKS5 proxy that evades TCP-based keyword filtering
//! through two cooperating mechanisms — application-layer header munging
//! and keyword-boundary write splitting in the proxy itself, and TCP
//! receive-window clamping enforced by an NFQUEUE packet interceptor.
//!
//! The two halves only share one thing: [`core::clamp_table::ClampTable`],
//! a lock-free port-keyed table. Sessions install and lift clamps as they
//! learn about their own traffic; the interceptor only ever reads it.

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod session;

use std::sync::Arc;

use crate::config::Config;
use crate::core::clamp_table::ClampTable;

/// Starts the packet interceptor and the SOCKS5 listener, and runs until
/// the listener returns an error (it normally never does; a bind or
/// accept-loop failure is the only way out). The interceptor is kept
/// alive for as long as this future runs and is torn down on return via
/// its `Drop` impl.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let clamp_table = Arc::new(ClampTable::new());
    let config = Arc::new(config);

    let _interceptor =
        capture::PacketInterceptor::start(config.nfqueue, Arc::clone(&clamp_table))?;

    session::run_listener(config, clamp_table).await
}
