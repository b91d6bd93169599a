//! Runtime configuration, parsed from the command line.
//!
//! All tunables named in the specification's "named options" table live
//! here as a single `clap::Parser` struct, so they can be found and
//! adjusted in one place rather than scattered across modules.

use std::net::SocketAddr;

use clap::Parser;

/// mcqfw — SOCKS5 proxy with TCP-window clamping and keyword-boundary splitting.
#[derive(Debug, Clone, Parser)]
#[command(name = "mcqfw", version, about)]
pub struct Config {
    /// Address the SOCKS5 listener binds to.
    #[arg(long, default_value = "127.0.0.1:8081")]
    pub listen: SocketAddr,

    /// Comma-separated keyword list; the first keyword (in this order)
    /// found in a forwarded buffer is the split point.
    #[arg(long, default_value = "taobao.com,.com,.cn,.net,.org", value_delimiter = ',')]
    pub keywords: Vec<String>,

    /// NFQUEUE queue number that outbound packets are steered into.
    #[arg(long, default_value_t = 1)]
    pub nfqueue: u16,

    /// TCP receive window clamp applied to flows dialing port 443.
    #[arg(long, default_value_t = 40)]
    pub window: u16,

    /// Forward-read count after which an active clamp is lifted.
    #[arg(long = "packet-count", default_value_t = 5)]
    pub packet_count: u32,

    /// Return-direction byte count after which an active clamp is lifted.
    #[arg(long = "byte-count", default_value_t = 512)]
    pub bytes_count: u64,
}

impl Config {
    /// Parse from `std::env::args`, then validate.
    ///
    /// `clap` already rejects malformed flags; this additionally rejects
    /// values that parse fine as their Rust type but are meaningless for
    /// this proxy (an empty keyword list, or a keyword that is the empty
    /// string and would match every buffer at offset 0).
    pub fn parse_validated() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.keywords.is_empty() {
            anyhow::bail!("keywords list must not be empty");
        }
        if self.keywords.iter().any(|k| k.is_empty()) {
            anyhow::bail!("keywords must not contain an empty string");
        }
        Ok(())
    }
}
