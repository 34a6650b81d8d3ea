//! Request-scoped context carriers.
use rand::RngCore;

/// Generates a 32-character lowercase-hex request identifier, matching the
/// wire contract in spec §6 (`X-Request-ID`).
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A request id is accepted from an inbound `X-Request-ID` header only if it
/// looks like one of ours: 32 lowercase hex characters. Anything else is
/// replaced rather than trusted verbatim, since the id is echoed back in
/// logs and the error body.
pub fn accept_or_generate(existing: Option<&str>) -> String {
    match existing {
        Some(id) if id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit()) => {
            id.to_ascii_lowercase()
        }
        _ => generate_request_id(),
    }
}
