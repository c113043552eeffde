pub type Digest = [u8; 64];

pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// First `len` bytes of a digest as lowercase hex, used as a log-friendly id.
pub fn short_hex(digest: &Digest, len: usize) -> String {
    digest
        .iter()
        .take(len)
        .map(|b| format!("{:02x}", b))
        .collect()
}
