//! Content digests for artifacts
//!
//! Digests are SHA256 fingerprints of artifact content. They are only ever
//! compared for equality, never ordered. Identical content yields identical
//! digests across runs and across artifact instances.

use crate::error::{BeaverError, BeaverResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Domain tag separating virtual artifact digests from file digests
const VIRTUAL_TAG: &[u8] = b"virtual\0";

/// Domain tag for directory digests
const DIRECTORY_TAG: &[u8] = b"directory\0";

/// A SHA256 content fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest raw bytes
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Digest the value wrapped by a virtual artifact
    pub fn of_virtual(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(VIRTUAL_TAG);
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for display (first 12 chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid digest '{s}': {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("invalid digest '{s}': expected 32 bytes"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Digest a file or directory on disk
///
/// Returns `Ok(None)` when the path does not exist. Directories are digested
/// as the sorted sequence of member names, kinds and digests.
pub fn digest_path(path: &Path) -> BeaverResult<Option<Digest>> {
    Ok(digest_entry(path)?.map(|(_, digest)| digest))
}

/// Member kind tag hashed into directory digests
fn digest_entry(path: &Path) -> BeaverResult<Option<(u8, Digest)>> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(resource_error(path, e)),
    };

    if metadata.is_dir() {
        Ok(Some((b'd', digest_directory(path)?)))
    } else {
        Ok(Some((b'f', digest_file(path)?)))
    }
}

fn digest_file(path: &Path) -> BeaverResult<Digest> {
    let mut file = fs::File::open(path).map_err(|e| resource_error(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| resource_error(path, e))?;
    Ok(Digest(hasher.finalize().into()))
}

fn digest_directory(path: &Path) -> BeaverResult<Digest> {
    let mut entries = fs::read_dir(path)
        .map_err(|e| resource_error(path, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| resource_error(path, e))?;
    entries.sort();

    let mut hasher = Sha256::new();
    hasher.update(DIRECTORY_TAG);
    for member in entries {
        // A member can vanish between listing and hashing; treat it as absent
        let Some((kind, member_digest)) = digest_entry(&member)? else {
            continue;
        };
        let name = member
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update([kind]);
        hasher.update(member_digest.as_bytes());
    }
    Ok(Digest(hasher.finalize().into()))
}

fn resource_error(path: &Path, e: io::Error) -> BeaverError {
    BeaverError::resource(path.display().to_string(), e.to_string())
}
