use sha2::{Digest, Sha256};

/// Hashing and blob path conventions for stored packages
pub struct ContentAddress;

impl ContentAddress {
    /// Hex SHA-256 of content, without prefix
    pub fn sha256_hex(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }

    /// Storage key for an uploaded archive
    /// Example: "packages/widgets/1.0.0.tar.gz"
    pub fn archive_key(name: &str, version: &str) -> String {
        format!("packages/{}/{}.tar.gz", name, version)
    }

    /// Storage key for a generated documentation index
    /// Example: "docs/widgets/1.0.0/index.json"
    pub fn docs_key(name: &str, version: &str) -> String {
        format!("docs/{}/{}/index.json", name, version)
    }

    /// Public download URL of an archive
    pub fn archive_url(base_url: &str, name: &str, version: &str) -> String {
        format!(
            "{}/packages/{}/versions/{}.tar.gz",
            base_url.trim_end_matches('/'),
            name,
            version
        )
    }

    /// Verify content matches expected digest
    pub fn verify(content: &[u8], expected: &str) -> bool {
        Self::sha256_hex(content) == expected
    }
}
