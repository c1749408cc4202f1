//! Server Name Indication extraction from a TLS ClientHello.
//!
//! Only the cleartext preamble is inspected; nothing is decrypted.

/// TLS record header: content type, version, length.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest TLS plaintext record, plus its header.
pub const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + (1 << 14);

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Bounds-checked big-endian reader.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| (usize::from(b[0]) << 16) | (usize::from(b[1]) << 8) | usize::from(b[2]))
    }

    /// A sub-reader over a block prefixed by a one-byte length.
    fn block8(&mut self) -> Option<Reader<'a>> {
        let len = usize::from(self.u8()?);
        self.take(len).map(Reader::new)
    }

    /// A sub-reader over a block prefixed by a two-byte length.
    fn block16(&mut self) -> Option<Reader<'a>> {
        let len = usize::from(self.u16()?);
        self.take(len).map(Reader::new)
    }

    fn take_rest(self) -> &'a [u8] {
        self.buf
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Whether `buf` starts like a TLS handshake record.
pub fn is_handshake(buf: &[u8]) -> bool {
    buf.first() == Some(&CONTENT_TYPE_HANDSHAKE)
}

/// Total length of the first TLS record, once its header is available.
///
/// Returns `None` if fewer than [`RECORD_HEADER_LEN`] bytes are buffered or
/// the data is not a handshake record.
pub fn record_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < RECORD_HEADER_LEN || !is_handshake(buf) {
        return None;
    }
    let body = usize::from(u16::from_be_bytes([buf[3], buf[4]]));
    Some((RECORD_HEADER_LEN + body).min(MAX_RECORD_LEN))
}

/// Hostname advertised in the ClientHello, lowercased.
///
/// Returns `None` for anything that is not a ClientHello with a host name
/// entry, including truncated input.
pub fn extract_sni(buf: &[u8]) -> Option<String> {
    let mut record = Reader::new(buf);
    if record.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    record.take(2)?;
    let mut handshake = record.block16()?;

    if handshake.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    let len = handshake.u24()?;
    let mut hello = Reader::new(handshake.take(len)?);

    // legacy_version + random
    hello.take(2 + 32)?;
    hello.block8()?; // session id
    hello.block16()?; // cipher suites
    hello.block8()?; // compression methods

    let mut extensions = hello.block16()?;
    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let mut ext = extensions.block16()?;
        if ext_type != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut names = ext.block16()?;
        while !names.is_empty() {
            let name_type = names.u8()?;
            let name = names.block16()?.take_rest();
            if name_type == NAME_TYPE_HOST_NAME {
                let host = std::str::from_utf8(name).ok()?;
                let host = host.trim_end_matches('.');
                if host.is_empty() {
                    return None;
                }
                return Some(host.to_ascii_lowercase());
            }
        }
        return None;
    }

    None
}

/// Build a minimal ClientHello record, optionally carrying `sni`.
#[doc(hidden)]
pub fn client_hello(sni: Option<&str>) -> Vec<u8> {
    let mut extensions = Vec::new();
    if let Some(host) = sni {
        let host = host.as_bytes();
        let mut list = vec![NAME_TYPE_HOST_NAME];
        list.extend_from_slice(&(host.len() as u16).to_be_bytes());
        list.extend_from_slice(host);

        extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&((list.len() + 2) as u16).to_be_bytes());
        extensions.extend_from_slice(&(list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&list);
    }
    // supported_versions, so the name is not the only extension.
    extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);

    let mut hello = vec![0x03, 0x03];
    hello.extend_from_slice(&[0x42; 32]);
    hello.push(0); // session id
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // one cipher suite
    hello.extend_from_slice(&[0x01, 0x00]); // null compression
    hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extensions);

    let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
