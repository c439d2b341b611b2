//! Trace and span identifier generation.

use rand::RngCore;

/// Generate a 128-bit trace id as 32 lowercase hex characters.
pub fn new_trace_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a 64-bit span id as 16 lowercase hex characters.
pub fn new_span_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// True if `id` is non-empty lowercase or uppercase hex.
pub(crate) fn is_hex_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_hexdigit())
}
