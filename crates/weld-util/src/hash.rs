/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Hash an ordered sequence of byte strings.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` never collide.
#[must_use]
pub fn blake3_parts<I, B>(parts: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hasher.finalize().to_hex().to_string()
}

/// First `len` hex digits of [`blake3_parts`], for use in generated names.
#[must_use]
pub fn short_hash<I, B>(parts: I, len: usize) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hex = blake3_parts(parts);
    hex.truncate(len.min(hex.len()));
    hex
}
