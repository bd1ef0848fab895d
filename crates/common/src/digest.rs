use blake3::Hasher;

pub type Digest32 = [u8; 32];

pub const ZERO_DIGEST: Digest32 = [0u8; 32];

/// Compute a Blake3 digest with a fully-qualified domain prefix to avoid collisions.
pub fn blake3_digest(domain: &str, schema: &str, version: &str, bytes: &[u8]) -> Digest32 {
    digest_parts(domain, schema, version, &[bytes])
}

/// Digest several byte slices under one domain separator.
///
/// Every part is length-prefixed so that moving bytes between adjacent parts
/// changes the digest.
pub fn digest_parts(domain: &str, schema: &str, version: &str, parts: &[&[u8]]) -> Digest32 {
    let mut hasher = Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(b":");
    hasher.update(schema.as_bytes());
    hasher.update(b":");
    hasher.update(version.as_bytes());
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
