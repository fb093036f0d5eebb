//! Flat JSON snapshot files for the in-memory backends.
//!
//! The whole state is rewritten after every successful mutation: serialize to
//! a sibling temp file, then rename over the target so a crash never leaves a
//! half-written snapshot behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; a missing file yields the default state.
    pub(crate) fn load<T>(&self) -> io::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn save<T: Serialize>(&self, state: &T) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(state).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("eventmill-{}", uuid::Uuid::now_v7()))
            .join(name)
    }

    #[test]
    fn missing_file_loads_default_state() {
        let file = SnapshotFile::new(temp_path("absent.json"));
        let state: BTreeMap<String, u64> = file.load().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn saved_state_is_read_back() {
        let file = SnapshotFile::new(temp_path("state.json"));
        let mut state = BTreeMap::new();
        state.insert("orders".to_string(), 3u64);

        file.save(&state).unwrap();
        let back: BTreeMap<String, u64> = file.load().unwrap();
        assert_eq!(back, state);

        let _ = fs::remove_dir_all(file.path().parent().unwrap());
    }

    #[test]
    fn corrupt_file_is_invalid_data() {
        let file = SnapshotFile::new(temp_path("corrupt.json"));
        fs::create_dir_all(file.path().parent().unwrap()).unwrap();
        fs::write(file.path(), b"{not json").unwrap();

        let err = file.load::<BTreeMap<String, u64>>().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let _ = fs::remove_dir_all(file.path().parent().unwrap());
    }
}
