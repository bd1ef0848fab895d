#![forbid(unsafe_code)]

pub mod digest;

pub use digest::{blake3_digest, digest_parts, Digest32, ZERO_DIGEST};

/// Domain prefix shared by every digest in the watermark workspace.
pub const DOMAIN: &str = "WMK";
