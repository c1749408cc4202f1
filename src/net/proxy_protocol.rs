//! PROXY protocol version 1 (text header).
//!
//! ```text
//! PROXY TCP4 192.0.2.1 198.51.100.1 56324 443\r\n
//! PROXY UNKNOWN\r\n
//! ```

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

/// Longest valid v1 header, including the trailing CRLF.
pub const MAX_V1_LEN: usize = 107;

const SIGNATURE: &[u8] = b"PROXY ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyProtocolError {
    #[error("missing PROXY signature")]
    Signature,

    #[error("header exceeds {MAX_V1_LEN} bytes")]
    TooLong,

    #[error("malformed header: {0}")]
    Malformed(&'static str),
}

/// Addresses carried by a header. `UNKNOWN` headers carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

/// Parse a v1 header at the start of `buf`.
///
/// Returns `Ok(None)` while the header is still incomplete, otherwise the
/// header and the number of bytes it occupies.
pub fn parse_v1(buf: &[u8]) -> Result<Option<(ProxyHeader, usize)>, ProxyProtocolError> {
    let prefix = buf.len().min(SIGNATURE.len());
    if buf[..prefix] != SIGNATURE[..prefix] {
        return Err(ProxyProtocolError::Signature);
    }

    let Some(end) = buf.windows(2).position(|w| w == b"\r\n") else {
        if buf.len() >= MAX_V1_LEN {
            return Err(ProxyProtocolError::TooLong);
        }
        return Ok(None);
    };
    let consumed = end + 2;
    if consumed > MAX_V1_LEN {
        return Err(ProxyProtocolError::TooLong);
    }

    let line = std::str::from_utf8(&buf[SIGNATURE.len()..end])
        .map_err(|_| ProxyProtocolError::Malformed("not ASCII"))?;
    let mut parts = line.split(' ');

    let header = match parts.next() {
        Some("UNKNOWN") => ProxyHeader {
            source: None,
            destination: None,
        },
        Some(family @ ("TCP4" | "TCP6")) => {
            let src_ip = parse_ip(parts.next(), family)?;
            let dst_ip = parse_ip(parts.next(), family)?;
            let src_port = parse_port(parts.next())?;
            let dst_port = parse_port(parts.next())?;
            if parts.next().is_some() {
                return Err(ProxyProtocolError::Malformed("trailing fields"));
            }
            ProxyHeader {
                source: Some(SocketAddr::new(src_ip, src_port)),
                destination: Some(SocketAddr::new(dst_ip, dst_port)),
            }
        }
        _ => return Err(ProxyProtocolError::Malformed("unknown protocol family")),
    };

    Ok(Some((header, consumed)))
}

fn parse_ip(field: Option<&str>, family: &str) -> Result<IpAddr, ProxyProtocolError> {
    let ip: IpAddr = field
        .ok_or(ProxyProtocolError::Malformed("missing address"))?
        .parse()
        .map_err(|_| ProxyProtocolError::Malformed("invalid address"))?;
    match (family, ip) {
        ("TCP4", IpAddr::V4(_)) | ("TCP6", IpAddr::V6(_)) => Ok(ip),
        _ => Err(ProxyProtocolError::Malformed("address family mismatch")),
    }
}

fn parse_port(field: Option<&str>) -> Result<u16, ProxyProtocolError> {
    field
        .ok_or(ProxyProtocolError::Malformed("missing port"))?
        .parse()
        .map_err(|_| ProxyProtocolError::Malformed("invalid port"))
}

/// Encode a v1 header for a connection from `source` to `destination`.
///
/// Mixed address families are sent as `UNKNOWN`.
pub fn encode_v1(source: SocketAddr, destination: SocketAddr) -> String {
    match (source, destination) {
        (SocketAddr::V4(s), SocketAddr::V4(d)) => {
            format!("PROXY TCP4 {} {} {} {}\r\n", s.ip(), d.ip(), s.port(), d.port())
        }
        (SocketAddr::V6(s), SocketAddr::V6(d)) => {
            format!("PROXY TCP6 {} {} {} {}\r\n", s.ip(), d.ip(), s.port(), d.port())
        }
        _ => "PROXY UNKNOWN\r\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp4_and_reports_length() {
        let raw = b"PROXY TCP4 192.0.2.1 198.51.100.1 56324 443\r\n\x16\x03\x01";
        let (header, used) = parse_v1(raw).unwrap().unwrap();
        assert_eq!(used, raw.len() - 3);
        assert_eq!(header.source, Some("192.0.2.1:56324".parse().unwrap()));
        assert_eq!(header.destination, Some("198.51.100.1:443".parse().unwrap()));
    }

    #[test]
    fn parses_tcp6_and_unknown() {
        let (header, _) = parse_v1(b"PROXY TCP6 2001:db8::1 2001:db8::2 1000 443\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(header.source, Some("[2001:db8::1]:1000".parse().unwrap()));

        let (header, used) = parse_v1(b"PROXY UNKNOWN\r\n").unwrap().unwrap();
        assert_eq!(header.source, None);
        assert_eq!(used, 15);
    }

    #[test]
    fn incomplete_then_invalid() {
        assert_eq!(parse_v1(b"PRO"), Ok(None));
        assert_eq!(parse_v1(b"PROXY TCP4 1.2.3.4"), Ok(None));
        assert_eq!(parse_v1(b"\x16\x03\x01"), Err(ProxyProtocolError::Signature));
        assert!(matches!(
            parse_v1(b"PROXY TCP4 ::1 ::1 1 2\r\n"),
            Err(ProxyProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_v1(b"PROXY TCP4 1.2.3.4 5.6.7.8 99999 1\r\n"),
            Err(ProxyProtocolError::Malformed(_))
        ));

        let long = [b"PROXY ".as_slice(), &[b'x'; MAX_V1_LEN]].concat();
        assert_eq!(parse_v1(&long), Err(ProxyProtocolError::TooLong));
    }

    #[test]
    fn encoded_header_parses_back() {
        let src: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let dst: SocketAddr = "10.0.0.2:443".parse().unwrap();
        let encoded = encode_v1(src, dst);
        assert_eq!(encoded, "PROXY TCP4 10.0.0.1 10.0.0.2 5000 443\r\n");

        let mixed = encode_v1(src, "[::1]:443".parse().unwrap());
        assert_eq!(mixed, "PROXY UNKNOWN\r\n");
    }
}
