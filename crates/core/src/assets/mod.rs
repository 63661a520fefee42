use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DanceError, Result};

/// Opaque identifier naming a dance and the directory its artifacts live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DanceId(String);

impl DanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids become directory names, so separators and parent references are
    /// not accepted as storage keys.
    fn is_storable(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(|c: char| c == '/' || c == '\\')
    }
}

impl fmt::Display for DanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for DanceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One of the three files composing a dance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    PoseTable,
    Audio,
    Analysis,
}

impl ArtifactKind {
    /// Download order used by the resolver.
    pub const ALL: [ArtifactKind; 3] = [Self::PoseTable, Self::Audio, Self::Analysis];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::PoseTable => "music_joints.csv",
            Self::Audio => "music.wav",
            Self::Analysis => "music_analysis.json",
        }
    }

    /// Whether a failed download of this artifact aborts the resolve.
    pub fn is_required(self) -> bool {
        !matches!(self, Self::Analysis)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PoseTable => "pose table",
            Self::Audio => "audio",
            Self::Analysis => "analysis data",
        })
    }
}

/// Local cache with one directory per dance under a common root.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    index: Mutex<BTreeSet<DanceId>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dance_dir(&self, dance: &DanceId) -> Result<PathBuf> {
        if dance.is_storable() {
            Ok(self.root.join(dance.as_str()))
        } else {
            Err(DanceError::msg(format!(
                "dance id `{dance}` cannot be used as a storage key"
            )))
        }
    }

    pub fn artifact_path(&self, dance: &DanceId, kind: ArtifactKind) -> Result<PathBuf> {
        Ok(self.dance_dir(dance)?.join(kind.file_name()))
    }

    pub fn exists(&self, dance: &DanceId, kind: ArtifactKind) -> bool {
        self.artifact_path(dance, kind)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    pub fn read(&self, dance: &DanceId, kind: ArtifactKind) -> Result<Vec<u8>> {
        let path = self.artifact_path(dance, kind)?;
        if !path.is_file() {
            return Err(DanceError::not_found(format!(
                "{kind} for `{dance}` at {}",
                path.display()
            )));
        }
        Ok(fs::read(path)?)
    }

    /// Persists an artifact, replacing any previous copy atomically.
    pub fn write(&self, dance: &DanceId, kind: ArtifactKind, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.dance_dir(dance)?;
        fs::create_dir_all(&dir)?;

        let target = dir.join(kind.file_name());
        let temp = target.with_extension("part");
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &target)?;

        debug!(dance = %dance, artifact = %kind, bytes = bytes.len(), "artifact stored");
        Ok(target)
    }

    /// Rescans the root and rebuilds the list of dances that have a pose
    /// table on disk.
    pub fn refresh(&self) -> Result<Vec<DanceId>> {
        let mut found = BTreeSet::new();
        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(DanceId::from) else {
                    continue;
                };
                if self.exists(&name, ArtifactKind::PoseTable) {
                    found.insert(name);
                }
            }
        }

        let ids: Vec<DanceId> = found.iter().cloned().collect();
        debug!(root = %self.root.display(), dances = ids.len(), "local index refreshed");
        *self.lock_index()? = found;
        Ok(ids)
    }

    /// Dances found by the most recent [`LocalStore::refresh`].
    pub fn dance_ids(&self) -> Result<Vec<DanceId>> {
        Ok(self.lock_index()?.iter().cloned().collect())
    }

    fn lock_index(&self) -> Result<MutexGuard<'_, BTreeSet<DanceId>>> {
        self.index
            .lock()
            .map_err(|_| DanceError::msg("local dance index has been poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_artifacts_under_the_dance_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let id = DanceId::from("waltz");

        assert!(!store.exists(&id, ArtifactKind::PoseTable));
        let path = store.write(&id, ArtifactKind::PoseTable, b"1,2").unwrap();

        assert_eq!(path, dir.path().join("waltz").join("music_joints.csv"));
        assert!(store.exists(&id, ArtifactKind::PoseTable));
        assert_eq!(store.read(&id, ArtifactKind::PoseTable).unwrap(), b"1,2");
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn missing_artifacts_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let err = store.read(&DanceId::from("nope"), ArtifactKind::Audio).unwrap_err();
        assert!(matches!(err, DanceError::NotFound(_)));
    }

    #[test]
    fn refresh_lists_only_dances_with_a_pose_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.write(&DanceId::from("b"), ArtifactKind::PoseTable, b"").unwrap();
        store.write(&DanceId::from("a"), ArtifactKind::PoseTable, b"").unwrap();
        store.write(&DanceId::from("c"), ArtifactKind::Audio, b"").unwrap();

        assert!(store.dance_ids().unwrap().is_empty());
        let ids = store.refresh().unwrap();

        assert_eq!(ids, vec![DanceId::from("a"), DanceId::from("b")]);
        assert_eq!(store.dance_ids().unwrap(), ids);
    }

    #[test]
    fn rejects_ids_that_escape_the_root() {
        let store = LocalStore::new("/tmp/dances");
        assert!(store.dance_dir(&DanceId::from("../etc")).is_err());
        assert!(store.dance_dir(&DanceId::from("")).is_err());
        assert!(!store.exists(&DanceId::from(".."), ArtifactKind::PoseTable));
    }

    #[test]
    fn only_analysis_is_optional() {
        assert!(ArtifactKind::PoseTable.is_required());
        assert!(ArtifactKind::Audio.is_required());
        assert!(!ArtifactKind::Analysis.is_required());
    }
}
