//! SOCKS5 handshake: version negotiation (no-auth only) and the CONNECT
//! request. Hand-rolled rather than pulled from a crate — the protocol
//! decoder is explicitly peripheral to this system's design, the same
//! way the original implementation hand-rolls it.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::SessionError;

const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const REP_SUCCESS: u8 = 0x00;
const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDR_TYPE_NOT_SUPPORTED: u8 = 0x08;
const ADDR_TYPE_IPV4: u8 = 0x01;
const ADDR_TYPE_DOMAIN: u8 = 0x03;

/// Target the client asked to CONNECT to, as a string dialable by
/// `TcpStream::connect` (which also performs system DNS resolution for
/// domain names).
pub struct Target {
    pub host_port: String,
    pub port: u16,
}

/// Step 1 of the handshake: read the version/method-selection message
/// and reply with "no authentication required". Any other requested
/// version is a protocol violation.
pub async fn negotiate_auth(conn: &mut TcpStream) -> Result<(), SessionError> {
    let mut header = [0u8; 2];
    conn.read_exact(&mut header)
        .await
        .map_err(|e| SessionError::HandshakeMalformed(format!("read version/nmethods: {e}")))?;

    let version = header[0];
    if version != VERSION {
        return Err(SessionError::HandshakeMalformed(format!(
            "wrong version: {version}"
        )));
    }

    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    conn.read_exact(&mut methods)
        .await
        .map_err(|e| SessionError::HandshakeMalformed(format!("read methods: {e}")))?;

    conn.write_all(&[VERSION, 0x00])
        .await
        .map_err(SessionError::Transport)?;

    Ok(())
}

/// Steps 2-4 of the handshake: read the CONNECT request and return the
/// target. On an unsupported command or address type, sends the
/// corresponding SOCKS5 reply byte before returning the error — "a
/// misbehaving client sees its reply byte, then a closed connection".
pub async fn read_connect_request(conn: &mut TcpStream) -> Result<Target, SessionError> {
    let mut header = [0u8; 4];
    conn.read_exact(&mut header)
        .await
        .map_err(|e| SessionError::HandshakeMalformed(format!("read request header: {e}")))?;

    let cmd = header[1];
    let addr_type = header[3];

    if cmd != CMD_CONNECT {
        send_reply(conn, REP_CMD_NOT_SUPPORTED).await?;
        return Err(SessionError::HandshakeMalformed(format!(
            "command {cmd} not supported"
        )));
    }

    let host = match addr_type {
        ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            conn.read_exact(&mut octets)
                .await
                .map_err(|e| SessionError::HandshakeMalformed(format!("read ipv4: {e}")))?;
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        ADDR_TYPE_DOMAIN => {
            let mut len_buf = [0u8; 1];
            conn.read_exact(&mut len_buf)
                .await
                .map_err(|e| SessionError::HandshakeMalformed(format!("read domain len: {e}")))?;
            let mut domain = vec![0u8; len_buf[0] as usize];
            conn.read_exact(&mut domain)
                .await
                .map_err(|e| SessionError::HandshakeMalformed(format!("read domain: {e}")))?;
            String::from_utf8(domain)
                .map_err(|e| SessionError::HandshakeMalformed(format!("domain not utf8: {e}")))?
        }
        other => {
            send_reply(conn, REP_ADDR_TYPE_NOT_SUPPORTED).await?;
            return Err(SessionError::HandshakeMalformed(format!(
                "address type {other} not supported"
            )));
        }
    };

    let mut port_buf = [0u8; 2];
    conn.read_exact(&mut port_buf)
        .await
        .map_err(|e| SessionError::HandshakeMalformed(format!("read port: {e}")))?;
    let port = u16::from_be_bytes(port_buf);

    send_reply(conn, REP_SUCCESS).await?;

    Ok(Target {
        host_port: format!("{host}:{port}"),
        port,
    })
}

async fn send_reply(conn: &mut TcpStream, reply: u8) -> Result<(), SessionError> {
    conn.write_all(&[VERSION, reply, 0x00, ADDR_TYPE_IPV4, 0, 0, 0, 0, 0, 0])
        .await
        .map_err(SessionError::Transport)
}
