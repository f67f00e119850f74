use chrono::{DateTime, Utc};
use rand::Rng as _;

/// Prefix of ids minted on the client before the server has confirmed them.
pub const TEMP_ID_PREFIX: &str = "tmp-";

const TEMP_ID_HEX_LEN: usize = 12;

/// Mint a client-side temporary item id.
///
/// The digest mixes the title, the creation instant and a random nonce, so
/// two devices creating the same title at the same instant still diverge.
#[must_use]
pub fn new_temp_id(title: &str, at: DateTime<Utc>) -> String {
    let nonce: u64 = rand::thread_rng().r#gen();
    let mut hasher = blake3::Hasher::new();
    hasher.update(title.as_bytes());
    hasher.update(&at.timestamp_micros().to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{TEMP_ID_PREFIX}{}", &hex[..TEMP_ID_HEX_LEN])
}

#[must_use]
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}
