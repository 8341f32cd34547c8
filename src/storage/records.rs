use anyhow::{Context, Result};
use serde_json::Value;

use crate::record::Record;

use super::KeyValueStore;

pub const DEFAULT_RECORDS_KEY: &str = "entries";
const QUARANTINE_SUFFIX: &str = ".corrupt";

/// Owner of the record list. Every mutation rewrites the whole persisted
/// list under one key; a failed write leaves the in-memory list untouched.
pub struct RecordStore<S> {
    storage: S,
    key: String,
    records: Vec<Record>,
    quarantined: bool,
}

impl<S: KeyValueStore> RecordStore<S> {
    pub fn load(storage: S) -> Result<Self> {
        Self::load_with_key(storage, DEFAULT_RECORDS_KEY)
    }

    /// Rehydrates the list stored under `key`. Entries that no longer decode
    /// are copied aside to `<key>.corrupt`; an entry whose only defect is its
    /// picture is kept without it. A value that is not a list at all is
    /// copied aside whole and the store starts empty.
    pub fn load_with_key(storage: S, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let raw = storage
            .get_item(&key)
            .with_context(|| format!("loading record list '{key}'"))?;
        let quarantine_key = format!("{key}{QUARANTINE_SUFFIX}");
        let mut quarantined = false;
        let records = match raw {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<Value>>(&raw) {
                Ok(entries) => {
                    let (records, rejected) = decode_entries(entries);
                    if !rejected.is_empty() {
                        tracing::warn!(
                            rejected = rejected.len(),
                            kept = records.len(),
                            key = %key,
                            quarantine = %quarantine_key,
                            "persisted record list has undecodable entries"
                        );
                        let encoded = serde_json::to_string(&rejected)
                            .context("serializing rejected entries")?;
                        storage
                            .set_item(&quarantine_key, &encoded)
                            .with_context(|| format!("quarantining entries of '{key}'"))?;
                        quarantined = true;
                    }
                    records
                }
                Err(err) => {
                    tracing::warn!(
                        %err,
                        key = %key,
                        quarantine = %quarantine_key,
                        "persisted record list is malformed; starting empty"
                    );
                    storage
                        .set_item(&quarantine_key, &raw)
                        .with_context(|| format!("quarantining malformed '{key}'"))?;
                    quarantined = true;
                    Vec::new()
                }
            },
        };
        tracing::debug!(count = records.len(), key = %key, "record list loaded");
        Ok(Self {
            storage,
            key,
            records,
            quarantined,
        })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether loading found an undecodable list and set it aside.
    pub fn recovered_from_corruption(&self) -> bool {
        self.quarantined
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn add(&mut self, record: Record) -> Result<()> {
        self.records.push(record);
        if let Err(err) = self.persist() {
            self.records.pop();
            return Err(err);
        }
        tracing::info!(index = self.records.len() - 1, "record added");
        Ok(())
    }

    /// Removes the record at `index`. Out-of-range indices are a no-op and
    /// yield `None`.
    pub fn remove(&mut self, index: usize) -> Result<Option<Record>> {
        if index >= self.records.len() {
            tracing::debug!(index, len = self.records.len(), "remove ignored");
            return Ok(None);
        }
        let removed = self.records.remove(index);
        if let Err(err) = self.persist() {
            self.records.insert(index, removed);
            return Err(err);
        }
        tracing::info!(index, "record removed");
        Ok(Some(removed))
    }

    /// Replaces the record at `index` wholesale. Returns `false` without
    /// writing when the index is out of range.
    pub fn update(&mut self, index: usize, record: Record) -> Result<bool> {
        let Some(slot) = self.records.get_mut(index) else {
            tracing::warn!(index, len = self.records.len(), "update ignored");
            return Ok(false);
        };
        let previous = std::mem::replace(slot, record);
        if let Err(err) = self.persist() {
            self.records[index] = previous;
            return Err(err);
        }
        tracing::info!(index, "record updated");
        Ok(true)
    }

    fn persist(&self) -> Result<()> {
        let encoded = serde_json::to_string(&self.records).context("serializing record list")?;
        self.storage
            .set_item(&self.key, &encoded)
            .with_context(|| format!("persisting record list '{}'", self.key))
    }
}

/// Splits persisted entries into decodable records and the raw entries that
/// could not be kept as they were.
fn decode_entries(entries: Vec<Value>) -> (Vec<Record>, Vec<Value>) {
    let mut records = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (position, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Record>(entry.clone()) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(position, %err, "dropping undecodable record entry");
                if let Some(record) = without_picture(&entry) {
                    records.push(record);
                }
                rejected.push(entry);
            }
        }
    }
    (records, rejected)
}

fn without_picture(entry: &Value) -> Option<Record> {
    let mut stripped = entry.clone();
    let fields = stripped.as_object_mut()?;
    fields.get("profilePicture")?;
    fields.insert("profilePicture".into(), Value::String(String::new()));
    let record = serde_json::from_value::<Record>(stripped).ok()?;
    tracing::warn!(name = %record.name, "kept record without its unreadable picture");
    Some(record)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::picture::{spawn_encode, PictureFile, PNG_SIGNATURE};
    use crate::storage::{self, MemoryStorage};
    use tempfile::TempDir;

    fn person(name: &str, country: &str) -> Record {
        Record {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone_number: "9800000000".into(),
            country: country.into(),
            ..Record::default()
        }
    }

    fn memory_store() -> anyhow::Result<(Arc<MemoryStorage>, RecordStore<Arc<MemoryStorage>>)> {
        let backing = Arc::new(MemoryStorage::new());
        let store = RecordStore::load(backing.clone())?;
        Ok((backing, store))
    }

    fn disk_storage(temp: &TempDir) -> anyhow::Result<storage::StorageHandle> {
        let root = temp.path();
        let paths = ConfigPaths {
            config_dir: root.join("config"),
            config_file: root.join("config/config.toml"),
            data_dir: root.join("data"),
            database_path: root.join("data/registry.db"),
            log_dir: root.join("state/logs"),
            state_dir: root.join("state"),
        };
        let mut options = StorageOptions::default();
        options.database_path = paths.database_path.clone();
        storage::init(&paths, &options)
    }

    #[test]
    fn starts_empty_without_persisted_list() -> anyhow::Result<()> {
        let (_backing, store) = memory_store()?;
        assert!(store.is_empty());
        assert!(!store.recovered_from_corruption());
        Ok(())
    }

    #[test]
    fn add_appends_and_round_trips_through_reload() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut store = RecordStore::load(disk_storage(&temp)?)?;
        store.add(person("Asha", "Nepal"))?;
        store.add(person("Bikash", "India"))?;
        assert_eq!(store.len(), 2);

        let reloaded = RecordStore::load(disk_storage(&temp)?)?;
        assert_eq!(reloaded.records(), store.records());
        Ok(())
    }

    #[test]
    fn persisted_list_is_flat_camel_case_json() -> anyhow::Result<()> {
        let (backing, mut store) = memory_store()?;
        store.add(person("Asha", "Nepal"))?;
        let json = backing.get_item(DEFAULT_RECORDS_KEY)?.unwrap_or_default();
        insta::assert_snapshot!(json, @r###"[{"name":"Asha","email":"asha@example.com","phoneNumber":"9800000000","dob":"","city":"","district":"","province":"","country":"Nepal","profilePicture":""}]"###);
        Ok(())
    }

    #[test]
    fn update_replaces_only_the_target_index() -> anyhow::Result<()> {
        let (backing, mut store) = memory_store()?;
        for name in ["A", "B", "C"] {
            store.add(person(name, "Nepal"))?;
        }
        let before = store.records().to_vec();

        let replacement = person("Bee", "Bhutan");
        assert!(store.update(1, replacement.clone())?);

        let reloaded = RecordStore::load(backing)?;
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(0), Some(&before[0]));
        assert_eq!(reloaded.get(1), Some(&replacement));
        assert_eq!(reloaded.get(2), Some(&before[2]));
        Ok(())
    }

    #[test]
    fn update_out_of_range_writes_nothing() -> anyhow::Result<()> {
        let (backing, mut store) = memory_store()?;
        assert!(!store.update(0, person("Ghost", "Nepal"))?);
        assert_eq!(backing.get_item(DEFAULT_RECORDS_KEY)?, None);
        Ok(())
    }

    #[test]
    fn remove_shifts_later_records_down() -> anyhow::Result<()> {
        let (backing, mut store) = memory_store()?;
        for name in ["A", "B", "C", "D"] {
            store.add(person(name, "Nepal"))?;
        }
        let removed = store.remove(1)?.expect("index 1 exists");
        assert_eq!(removed.name, "B");

        let reloaded = RecordStore::load(backing)?;
        let names: Vec<&str> = reloaded.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C", "D"]);
        Ok(())
    }

    #[test]
    fn remove_out_of_range_is_a_no_op() -> anyhow::Result<()> {
        let (_backing, mut store) = memory_store()?;
        store.add(person("Only", "Nepal"))?;
        assert!(store.remove(5)?.is_none());
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn malformed_list_is_quarantined_and_treated_as_empty() -> anyhow::Result<()> {
        let backing = Arc::new(MemoryStorage::new());
        backing.set_item(DEFAULT_RECORDS_KEY, "{not json")?;

        let mut store = RecordStore::load(backing.clone())?;
        assert!(store.is_empty());
        assert!(store.recovered_from_corruption());
        assert_eq!(
            backing.get_item("entries.corrupt")?.as_deref(),
            Some("{not json")
        );

        store.add(person("Fresh", "Nepal"))?;
        assert_eq!(
            backing.get_item("entries.corrupt")?.as_deref(),
            Some("{not json")
        );
        Ok(())
    }

    #[test]
    fn undecodable_entries_are_set_aside_individually() -> anyhow::Result<()> {
        let backing = Arc::new(MemoryStorage::new());
        let list = r#"[
            {"name":"Asha","email":"asha@example.com","phoneNumber":"9800000000","country":"Nepal"},
            {"name":"Bikash","email":"bikash@example.com","phoneNumber":"9811111111","country":"India",
             "profilePicture":"data:image/jpeg;base64,/9j/4AAQ"},
            {"email":"nameless@example.com"}
        ]"#;
        backing.set_item(DEFAULT_RECORDS_KEY, list)?;

        let store = RecordStore::load(backing.clone())?;
        assert_eq!(store.len(), 2);
        assert!(store.recovered_from_corruption());
        assert_eq!(store.get(0).map(|r| r.name.as_str()), Some("Asha"));
        let kept = store.get(1).expect("picture-less record kept");
        assert_eq!(kept.name, "Bikash");
        assert_eq!(kept.profile_picture, None);

        let aside: Vec<serde_json::Value> = serde_json::from_str(
            &backing.get_item("entries.corrupt")?.unwrap_or_default(),
        )?;
        assert_eq!(aside.len(), 2);
        assert_eq!(aside[0]["profilePicture"], "data:image/jpeg;base64,/9j/4AAQ");
        assert_eq!(aside[1]["email"], "nameless@example.com");
        Ok(())
    }

    #[test]
    fn picture_data_uri_survives_persistence() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("me.png");
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(b"\0\0\0\rIHDR");
        fs::write(&path, &bytes)?;
        let picture = spawn_encode(&PictureFile::new(&path)).wait()?;

        let mut store = RecordStore::load(disk_storage(&temp)?)?;
        let mut record = person("Pic", "Nepal");
        record.profile_picture = Some(picture.clone());
        store.add(record)?;

        let reloaded = RecordStore::load(disk_storage(&temp)?)?;
        let stored = reloaded
            .get(0)
            .and_then(|record| record.profile_picture.as_ref())
            .expect("picture persisted");
        assert_eq!(stored.as_str(), picture.as_str());
        Ok(())
    }
}
