//! Magnet descriptor validation.
//!
//! The descriptor is validated before any socket is bound or scratch
//! directory is created, so a typo costs nothing.

use std::fmt;

/// Errors produced while validating a swarm descriptor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DescriptorError {
    #[error("Not a magnet URI: {input}")]
    NotMagnet { input: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnet { reason: String },

    #[error("Missing info hash in magnet link: {uri}")]
    MissingInfoHash { uri: String },

    #[error("Invalid info hash length: {length} (expected 40)")]
    InvalidHashLength { length: usize },

    #[error("Invalid hex character in info hash: {hash}")]
    InvalidHex { hash: String },
}

/// 20-byte swarm identifier extracted from the exact topic parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Validated magnet descriptor for a single swarm.
///
/// Holds the original URI (handed verbatim to the swarm engine) along
/// with the fields extracted during validation.
#[derive(Debug, Clone)]
pub struct Descriptor {
    uri: String,
    info_hash: InfoHash,
    display_name: Option<String>,
}

impl Descriptor {
    /// Validates a raw descriptor string.
    ///
    /// # Errors
    /// - `DescriptorError::NotMagnet` - Input does not use the magnet scheme
    /// - `DescriptorError::InvalidMagnet` - Magnet URI is malformed
    /// - `DescriptorError::MissingInfoHash` - No `xt=urn:btih:` parameter
    /// - `DescriptorError::InvalidHashLength` - Hash is not 40 hex characters
    /// - `DescriptorError::InvalidHex` - Hash contains non-hex characters
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        if !raw.starts_with("magnet:") {
            return Err(DescriptorError::NotMagnet {
                input: raw.to_string(),
            });
        }

        let magnet =
            magnet_url::Magnet::new(raw).map_err(|e| DescriptorError::InvalidMagnet {
                reason: e.to_string(),
            })?;

        let info_hash = extract_info_hash(raw)?;

        Ok(Self {
            uri: raw.to_string(),
            info_hash,
            display_name: magnet.display_name().map(|s| s.to_string()),
        })
    }

    /// Returns the original magnet URI.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Returns the swarm's info hash.
    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Returns the display name hint from the magnet link, if present.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info_hash)
    }
}

/// Extracts the info hash from the exact topic (xt) parameter.
fn extract_info_hash(uri: &str) -> Result<InfoHash, DescriptorError> {
    for param in uri.split(['?', '&']) {
        if let Some(value) = param.strip_prefix("xt=urn:btih:") {
            return parse_hash(value);
        }
    }

    Err(DescriptorError::MissingInfoHash {
        uri: uri.to_string(),
    })
}

/// Parses a 40-character hex string into a 20-byte hash.
fn parse_hash(value: &str) -> Result<InfoHash, DescriptorError> {
    if value.len() != 40 {
        return Err(DescriptorError::InvalidHashLength {
            length: value.len(),
        });
    }

    let bytes = hex::decode(value).map_err(|_| DescriptorError::InvalidHex {
        hash: value.to_string(),
    })?;

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&bytes);
    Ok(InfoHash::new(hash))
}
