//! Session wire codec
//!
//! Pure functions translating between wire bytes and in-memory message
//! content. The protocol is text over base64:
//!
//! - Outbound announcement: ASCII `"ClientHello <port>"`, sent as-is.
//! - Inbound payload: base64 blob whose decoded text is a sequence of
//!   space-delimited tokens.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::Result;

/// Decode an inbound datagram into its token sequence.
///
/// The payload is base64-decoded, converted to text (invalid UTF-8 is
/// replaced rather than rejected), and split on single
/// spaces. Empty tokens from consecutive delimiters are preserved.
pub fn decode(raw: &[u8]) -> Result<Vec<String>> {
    let bytes = BASE64.decode(raw)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.split(' ').map(str::to_string).collect())
}

/// Format the handshake/heartbeat announcement for a bound port.
pub fn encode_hello(port: u16) -> String {
    format!("ClientHello {port}")
}
