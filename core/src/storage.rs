use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RepositoryError;
use crate::models::Project;

/// Key the mobile app has always stored the project collection under.
pub const DEFAULT_COLLECTION_KEY: &str = "results";

/// Durable, ordered collection of projects.
pub trait Repository {
    fn list(&self) -> Result<Vec<Project>, RepositoryError>;
    /// Append `project` and return its index.
    fn append(&mut self, project: Project) -> Result<usize, RepositoryError>;
    fn replace(&mut self, index: usize, project: Project) -> Result<(), RepositoryError>;

    fn load(&self, index: usize) -> Result<Option<Project>, RepositoryError> {
        Ok(self.list()?.into_iter().nth(index))
    }
}

/// String key/value persistence, the shape of a mobile async-storage API.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, RepositoryError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), RepositoryError>;
}

/// Stores the whole collection as one JSON array under a single key. Every
/// mutation rewrites the full array, so readers never see a partial update.
///
/// Mutations work on the raw array, so a record this version cannot decode
/// is carried along untouched and never blocks saving other projects.
#[derive(Clone, Debug)]
pub struct JsonRepository<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> JsonRepository<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn corrupt(&self, message: String) -> RepositoryError {
        RepositoryError::Corrupt {
            key: self.key.clone(),
            message,
        }
    }

    fn read_raw(&self) -> Result<Vec<Value>, RepositoryError> {
        match self.store.get_item(&self.key)? {
            None => Ok(Vec::new()),
            Some(blob) => serde_json::from_str(&blob).map_err(|e| self.corrupt(e.to_string())),
        }
    }

    fn write_raw(&mut self, records: &[Value]) -> Result<(), RepositoryError> {
        let blob = serde_json::to_string(records)
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;
        self.store.set_item(&self.key, &blob)
    }

    fn decode(&self, index: usize, record: Value) -> Result<Project, RepositoryError> {
        serde_json::from_value(record).map_err(|e| {
            warn!(key = %self.key, index, error = %e, "unreadable project record");
            self.corrupt(format!("record {index}: {e}"))
        })
    }
}

fn encode(project: &Project) -> Result<Value, RepositoryError> {
    serde_json::to_value(project).map_err(|e| RepositoryError::Storage(e.to_string()))
}

impl<S: KeyValueStore> Repository for JsonRepository<S> {
    fn list(&self) -> Result<Vec<Project>, RepositoryError> {
        self.read_raw()?
            .into_iter()
            .enumerate()
            .map(|(index, record)| self.decode(index, record))
            .collect()
    }

    fn append(&mut self, project: Project) -> Result<usize, RepositoryError> {
        let mut records = self.read_raw()?;
        records.push(encode(&project)?);
        self.write_raw(&records)?;
        let index = records.len() - 1;
        debug!(key = %self.key, index, "project appended");
        Ok(index)
    }

    fn replace(&mut self, index: usize, project: Project) -> Result<(), RepositoryError> {
        let mut records = self.read_raw()?;
        let len = records.len();
        let slot = records
            .get_mut(index)
            .ok_or(RepositoryError::IndexOutOfRange { index, len })?;
        *slot = encode(&project)?;
        self.write_raw(&records)?;
        debug!(key = %self.key, index, "project replaced");
        Ok(())
    }

    fn load(&self, index: usize) -> Result<Option<Project>, RepositoryError> {
        match self.read_raw()?.into_iter().nth(index) {
            Some(record) => self.decode(index, record).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    items: HashMap<String, String>,
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), RepositoryError> {
        if self.fail_writes {
            return Err(RepositoryError::Storage("store is read-only".to_string()));
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory. Writes go to a
/// temporary sibling first and are renamed into place.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Storage(e.to_string())),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), RepositoryError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::create_dir_all(&self.dir).map_err(|e| RepositoryError::Storage(e.to_string()))?;

        let written = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(value.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(RepositoryError::Storage(e.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StationNumber, SurveyConstants};

    fn project(name: &str) -> Project {
        Project::new(
            name.to_string(),
            SurveyConstants {
                transect: 4,
                inter_station_m: 2.5,
                average_resistivity: 120.0,
                inter_coil_m: 1.2,
            },
            None,
        )
    }

    #[test]
    fn test_empty_collection() {
        let repo = JsonRepository::new(MemoryStore::new(), DEFAULT_COLLECTION_KEY);
        assert!(repo.list().unwrap().is_empty());
        assert_eq!(repo.load(0).unwrap(), None);
    }

    #[test]
    fn test_append_then_list() {
        let mut repo = JsonRepository::new(MemoryStore::new(), DEFAULT_COLLECTION_KEY);
        assert_eq!(repo.append(project("a")).unwrap(), 0);
        let p = project("b").with_station(StationNumber(401), Vec::new());
        assert_eq!(repo.append(p.clone()).unwrap(), 1);

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.last(), Some(&p));
    }

    #[test]
    fn test_replace_keeps_other_entries() {
        let mut repo = JsonRepository::new(MemoryStore::new(), DEFAULT_COLLECTION_KEY);
        for name in ["a", "b", "c"] {
            repo.append(project(name)).unwrap();
        }
        let p2 = project("b2");
        repo.replace(1, p2.clone()).unwrap();

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], project("a"));
        assert_eq!(all[1], p2);
        assert_eq!(all[2], project("c"));
    }

    #[test]
    fn test_replace_out_of_range() {
        let mut repo = JsonRepository::new(MemoryStore::new(), DEFAULT_COLLECTION_KEY);
        repo.append(project("a")).unwrap();
        assert_eq!(
            repo.replace(1, project("x")),
            Err(RepositoryError::IndexOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(repo.list().unwrap(), vec![project("a")]);
    }

    #[test]
    fn test_failed_write_leaves_collection_untouched() {
        let mut repo = JsonRepository::new(MemoryStore::new(), DEFAULT_COLLECTION_KEY);
        repo.append(project("a")).unwrap();
        repo.store_mut().fail_writes = true;

        assert!(matches!(
            repo.append(project("b")),
            Err(RepositoryError::Storage(_))
        ));
        assert_eq!(repo.list().unwrap(), vec![project("a")]);
    }

    #[test]
    fn test_corrupt_blob() {
        let mut store = MemoryStore::new();
        store.set_item("results", "{not json").unwrap();
        let repo = JsonRepository::new(store, "results");
        assert!(matches!(
            repo.list(),
            Err(RepositoryError::Corrupt { ref key, .. }) if key == "results"
        ));
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        let mut repo = JsonRepository::new(store, "survey/results");

        repo.append(project("a")).unwrap();
        repo.append(project("b")).unwrap();
        repo.replace(0, project("a2")).unwrap();

        let store = FileStore::new(dir.path().join("nested"));
        let reopened = JsonRepository::new(store, "survey/results");
        assert_eq!(reopened.list().unwrap(), vec![project("a2"), project("b")]);
        assert!(dir.path().join("nested").join("survey_results.json").exists());
        assert!(!dir.path().join("nested").join("survey_results.json.tmp").exists());
    }

    #[test]
    fn test_file_store_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.get_item("absent").unwrap(), None);
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        // A directory where the target file should go makes the rename fail.
        fs::create_dir(dir.path().join("results.json")).unwrap();
        fs::write(dir.path().join("results.json").join("keep"), "x").unwrap();

        assert!(matches!(
            store.set_item("results", "[]"),
            Err(RepositoryError::Storage(_))
        ));
        assert!(!dir.path().join("results.json.tmp").exists());
    }

    #[test]
    fn test_legacy_null_record_stays_usable() {
        let legacy = r#"[{
            "name": "zero coil",
            "common": {"transcat": "1", "interstation": "10", "averageResistivity": "100", "intercoil": "0"},
            "stations": {"101": [{
                "frequency": 813, "txCurrent": "0.50", "rxVoltage": "10.00",
                "latitude": "0.000000", "longitude": "0.000000", "distance": 0,
                "calculatedDepth": null, "calculatedConductivity": null,
                "calculatedResistivity": null, "date": "1/2/2026", "time": "9:00:00 AM"
            }]}
        }]"#;
        let mut store = MemoryStore::new();
        store.set_item("results", legacy).unwrap();
        let mut repo = JsonRepository::new(store, "results");

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 1);
        let m = &all[0].station(StationNumber(101)).unwrap()[0];
        assert!(m.calculated_conductivity.is_nan());

        assert_eq!(repo.append(project("new")).unwrap(), 1);
        assert_eq!(repo.list().unwrap()[1], project("new"));
    }

    #[test]
    fn test_undecodable_record_does_not_block_saves() {
        let mut store = MemoryStore::new();
        store.set_item("results", r#"[{"legacy": true}]"#).unwrap();
        let mut repo = JsonRepository::new(store, "results");

        assert!(matches!(repo.list(), Err(RepositoryError::Corrupt { .. })));
        assert_eq!(repo.append(project("a")).unwrap(), 1);
        repo.replace(1, project("a2")).unwrap();
        assert_eq!(repo.load(1).unwrap(), Some(project("a2")));
        assert!(matches!(repo.load(0), Err(RepositoryError::Corrupt { .. })));
        assert_eq!(repo.load(2).unwrap(), None);

        let blob = repo.store().get_item("results").unwrap().unwrap();
        assert!(blob.starts_with(r#"[{"legacy":true}"#));
    }
}
