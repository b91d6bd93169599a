//! Pure IPv4/TCP packet inspection and rewriting.
//!
//! Kept free of any NFQUEUE or socket dependency so the per-packet
//! contract (parse, clamp, re-checksum, re-serialize) can be unit tested
//! against hand-built byte buffers, the same way the original codec
//! fixtures in this corpus build minimal protocol frames by hand rather
//! than depending on a live capture.

use etherparse::{IpHeader, PacketHeaders, TransportHeader};

use crate::error::PacketError;

/// Outcome of inspecting one outbound packet.
pub enum Verdict {
    /// Not TCP, or TCP but no clamp applies — forward the original bytes.
    Unchanged,
    /// TCP with an active, tighter clamp — forward these bytes instead.
    Replace(Vec<u8>),
}

/// Implements the per-packet contract of the specification:
///
/// 1. Parse as IPv4; non-TCP payloads pass through unchanged.
/// 2. Look up the clamp for the TCP source port via `cap_for_port`.
/// 3. If the clamp is 0 or already `<=` the advertised window, pass
///    through unchanged.
/// 4. Otherwise clamp the window, recompute checksums, and return the
///    replacement bytes.
pub fn inspect(data: &[u8], cap_for_port: impl FnOnce(u16) -> u16) -> Result<Verdict, PacketError> {
    let headers =
        PacketHeaders::from_ip_slice(data).map_err(|e| PacketError::Parse(e.to_string()))?;

    let Some(IpHeader::Version4(mut ipv4, ip_exts)) = headers.ip else {
        return Ok(Verdict::Unchanged);
    };
    let Some(TransportHeader::Tcp(mut tcp)) = headers.transport else {
        return Ok(Verdict::Unchanged);
    };

    let cap = cap_for_port(tcp.source_port);
    if cap == 0 || tcp.window_size <= cap {
        return Ok(Verdict::Unchanged);
    }

    tcp.window_size = cap;

    let payload = headers.payload;
    ipv4.header_checksum = ipv4
        .calc_header_checksum()
        .map_err(|e| PacketError::Serialize(e.to_string()))?;
    tcp.checksum = tcp
        .calc_checksum_ipv4(&ipv4, payload)
        .map_err(|e| PacketError::Serialize(e.to_string()))?;

    let mut out = Vec::with_capacity(data.len());
    ipv4.write(&mut out)
        .map_err(|e| PacketError::Serialize(e.to_string()))?;
    ip_exts
        .write(&mut out, ipv4.protocol)
        .map_err(|e| PacketError::Serialize(e.to_string()))?;
    tcp.write(&mut out)
        .map_err(|e| PacketError::Serialize(e.to_string()))?;
    out.extend_from_slice(payload);

    Ok(Verdict::Replace(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    /// Build a minimal IPv4+TCP packet with the given source port and
    /// advertised window, and no payload.
    fn build_tcp_packet(src_port: u16, dst_port: u16, window: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(src_port, dst_port, 0, window);
        let mut out = Vec::new();
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn build_udp_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).udp(src_port, dst_port);
        let mut out = Vec::new();
        builder.write(&mut out, payload).unwrap();
        out
    }

    fn tcp_window_of(data: &[u8]) -> u16 {
        let headers = PacketHeaders::from_ip_slice(data).unwrap();
        match headers.transport.unwrap() {
            TransportHeader::Tcp(tcp) => tcp.window_size,
            _ => panic!("expected TCP"),
        }
    }

    #[test]
    fn test_non_tcp_packet_passes_unchanged() {
        let pkt = build_udp_packet(5353, 53, b"hello");
        match inspect(&pkt, |_| 40).unwrap() {
            Verdict::Unchanged => {}
            Verdict::Replace(_) => panic!("UDP must never be mutated (I3)"),
        }
    }

    #[test]
    fn test_tcp_with_no_clamp_passes_unchanged() {
        let pkt = build_tcp_packet(12345, 443, 65535, b"");
        match inspect(&pkt, |_| 0).unwrap() {
            Verdict::Unchanged => {}
            Verdict::Replace(_) => panic!("a 0 cap must never mutate the packet"),
        }
    }

    #[test]
    fn test_tcp_with_window_already_below_cap_passes_unchanged() {
        let pkt = build_tcp_packet(12345, 443, 10, b"");
        match inspect(&pkt, |_| 40).unwrap() {
            Verdict::Unchanged => {}
            Verdict::Replace(_) => panic!("window already <= cap must not be rewritten"),
        }
    }

    #[test]
    fn test_tcp_window_clamped_and_reserializes() {
        let pkt = build_tcp_packet(12345, 443, 65535, b"");
        match inspect(&pkt, |port| if port == 12345 { 40 } else { 0 }).unwrap() {
            Verdict::Replace(new_bytes) => {
                assert_eq!(tcp_window_of(&new_bytes), 40);
                // re-parsing with etherparse validates the checksum implicitly
                // is internally consistent; also assert total length preserved.
                assert_eq!(new_bytes.len(), pkt.len());
            }
            Verdict::Unchanged => panic!("window above cap must be clamped (I4)"),
        }
    }

    #[test]
    fn test_clamp_lookup_keyed_by_source_port_only() {
        let pkt = build_tcp_packet(9999, 443, 65535, b"");
        // cap_for_port is only ever called with the packet's source port
        let mut seen_port = None;
        let _ = inspect(&pkt, |port| {
            seen_port = Some(port);
            0
        });
        assert_eq!(seen_port, Some(9999));
    }

    #[test]
    fn test_checksum_is_valid_after_clamp() {
        let pkt = build_tcp_packet(12345, 443, 65535, b"GET / HTTP/1.1");
        let new_bytes = match inspect(&pkt, |_| 40).unwrap() {
            Verdict::Replace(b) => b,
            Verdict::Unchanged => panic!("expected a rewrite"),
        };
        // A packet with a corrupt checksum still parses with etherparse
        // (it doesn't verify checksums on read), so instead recompute the
        // expected checksum independently and compare.
        let headers = PacketHeaders::from_ip_slice(&new_bytes).unwrap();
        let ip = match headers.ip.unwrap() {
            IpHeader::Version4(ip, _) => ip,
            _ => panic!("expected IPv4"),
        };
        let tcp = match headers.transport.unwrap() {
            TransportHeader::Tcp(tcp) => tcp,
            _ => panic!("expected TCP"),
        };
        let expected = tcp.calc_checksum_ipv4(&ip, headers.payload).unwrap();
        assert_eq!(tcp.checksum, expected);
    }

    /// Build a minimal IPv4 header (protocol = ICMP) over 4 bytes of
    /// payload that happen to look like a source/dest port pair — by hand,
    /// the same way the teacher's capture tests build fixture packets,
    /// rather than through a TCP/UDP-specific builder that has no ICMP
    /// equivalent.
    fn build_icmp_packet(fake_port_bytes: [u8; 4]) -> Vec<u8> {
        let total_length: u16 = 24;
        let mut pkt = vec![0u8; total_length as usize];
        pkt[0] = 0x45; // version 4, IHL 5
        pkt[2] = (total_length >> 8) as u8;
        pkt[3] = (total_length & 0xFF) as u8;
        pkt[9] = 1; // ICMP
        pkt[20..24].copy_from_slice(&fake_port_bytes);
        pkt
    }

    #[test]
    fn test_icmp_packet_on_colliding_port_passes_unchanged() {
        // Scenario 6: an ICMP packet whose payload bytes happen to collide
        // with an active clamp slot must never be mutated, because it is
        // never even parsed as TCP.
        let pkt = build_icmp_packet([0x30, 0x39, 0x01, 0xBB]); // looks like port 12345 -> 443
        match inspect(&pkt, |_| 40) {
            Ok(Verdict::Unchanged) => {}
            Ok(Verdict::Replace(_)) => panic!("non-TCP packet must never be mutated"),
            Err(_) => {
                // A header etherparse declines to parse past is also an
                // acceptable outcome; the contract is only that it is never
                // turned into a TCP rewrite.
            }
        }
    }
}
