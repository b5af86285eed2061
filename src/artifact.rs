//! Artifacts: named, digestible build resources
//!
//! An artifact is either file-backed, a virtual in-memory value written by an
//! in-process transformation, or a phony marker that never has a digest. The
//! only mutable state an artifact holds is its memoized digest and, for
//! virtual artifacts, the wrapped value.

use crate::digest::{digest_path, Digest};
use crate::error::BeaverResult;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Unique artifact key within a build graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ArtifactId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtifactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Concrete representation behind an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// File or directory relative to the build root
    File,
    /// In-memory value produced by an in-process transformation
    Virtual,
    /// Marker without a stable digest; always considered stale
    Phony,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Virtual => "virtual",
            Self::Phony => "phony",
        };
        write!(f, "{}", name)
    }
}

/// A named, digestible resource
#[derive(Debug)]
pub struct Artifact {
    id: ArtifactId,
    kind: ArtifactKind,
    path: Option<PathBuf>,
    expected_digest: Option<Digest>,
    value: RwLock<Option<Vec<u8>>>,
    digest: Mutex<Option<Option<Digest>>>,
}

impl Artifact {
    /// Create a file-backed artifact resolved against the build root
    pub fn file(id: impl Into<ArtifactId>, root: &Path) -> Self {
        let id = id.into();
        let path = root.join(id.as_str());
        Self::with_kind(id, ArtifactKind::File, Some(path))
    }

    /// Create a virtual artifact with no value yet
    pub fn virtual_artifact(id: impl Into<ArtifactId>) -> Self {
        Self::with_kind(id.into(), ArtifactKind::Virtual, None)
    }

    /// Create a phony marker artifact
    pub fn phony(id: impl Into<ArtifactId>) -> Self {
        Self::with_kind(id.into(), ArtifactKind::Phony, None)
    }

    fn with_kind(id: ArtifactId, kind: ArtifactKind, path: Option<PathBuf>) -> Self {
        Self {
            id,
            kind,
            path,
            expected_digest: None,
            value: RwLock::new(None),
            digest: Mutex::new(None),
        }
    }

    /// Attach the digest the artifact content is expected to have
    pub fn with_expected_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    /// Unique key of the artifact
    pub fn identity(&self) -> &ArtifactId {
        &self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Filesystem location for file artifacts
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn expected_digest(&self) -> Option<Digest> {
        self.expected_digest
    }

    /// Whether a missing digest is acceptable rather than an error
    pub fn absence_is_acceptable(&self) -> bool {
        matches!(self.kind, ArtifactKind::Phony)
    }

    /// Compute the digest, reusing the memoized value if present
    ///
    /// Returns `Ok(None)` when the underlying resource does not exist.
    pub fn resolve(&self) -> BeaverResult<Option<Digest>> {
        let mut cached = self.digest.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(digest) = *cached {
            return Ok(digest);
        }
        let digest = self.compute()?;
        *cached = Some(digest);
        Ok(digest)
    }

    /// Drop the memoized digest so the next `resolve` reads storage again
    pub fn invalidate(&self) {
        *self.digest.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Invalidate and recompute the digest
    pub fn refresh(&self) -> BeaverResult<Option<Digest>> {
        self.invalidate();
        self.resolve()
    }

    /// Memoized digest without touching storage
    pub fn cached_digest(&self) -> Option<Option<Digest>> {
        *self.digest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the underlying resource currently exists
    pub fn exists(&self) -> BeaverResult<bool> {
        match self.kind {
            ArtifactKind::File => Ok(self.path.as_deref().is_some_and(Path::exists)),
            ArtifactKind::Virtual => Ok(self.read_value().is_some()),
            ArtifactKind::Phony => Ok(false),
        }
    }

    /// Current value of a virtual artifact
    pub fn read_value(&self) -> Option<Vec<u8>> {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the value of a virtual artifact
    ///
    /// The memoized digest is invalidated; it is recomputed when the
    /// producing transformation completes.
    pub fn write_value(&self, data: impl Into<Vec<u8>>) {
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = Some(data.into());
        self.invalidate();
    }

    fn compute(&self) -> BeaverResult<Option<Digest>> {
        match self.kind {
            ArtifactKind::File => match &self.path {
                Some(path) => digest_path(path),
                None => Ok(None),
            },
            ArtifactKind::Virtual => Ok(self.read_value().map(|v| Digest::of_virtual(&v))),
            ArtifactKind::Phony => Ok(None),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ArtifactKind::File => "File",
            ArtifactKind::Virtual => "Virtual",
            ArtifactKind::Phony => "Phony",
        };
        write!(f, "{}({})", kind, self.id)
    }
}
