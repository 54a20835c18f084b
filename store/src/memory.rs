//! An `RwLock`-backed reference implementation of [`RecordingStore`] and
//! [`CategoryStore`], suitable for tests and single-process deployments.
//! Mirrors `storage::db::crud`'s per-table layout (one map per concern)
//! without a backing database engine.

use std::collections::HashMap;
use std::sync::RwLock;

use log::{debug, trace};
use ulid::Ulid;

use crate::errors::{Error, StoreResult};
use crate::traits::{
    CategoryDescription, CategoryId, CategoryRecord, CategoryStore, ExampleScore, RecordingId,
    RecordingRecord, RecordingStore, StoredRecordingFeatures, Transactional,
};

#[derive(Default, Clone)]
struct Tables {
    recordings: HashMap<RecordingId, RecordingRecord>,
    categories: HashMap<CategoryId, CategoryRecord>,
    category_names: HashMap<String, CategoryId>,
    category_descriptions: HashMap<CategoryId, CategoryDescription>,
    recording_to_category_scores: HashMap<(CategoryId, RecordingId), f64>,
    category_example_scores: HashMap<(CategoryId, RecordingId), ExampleScore>,
}

/// A single-process, in-memory store. Cheap to construct; typically
/// wrapped in an `Arc` for sharing across the worker pool that drives
/// per-recording extraction (§5). Nestable transactions (`Transactional`)
/// are implemented as a stack of full-table snapshots taken at each
/// `begin_transaction`; this is simple rather than minimal, which is fine
/// at the table sizes an in-memory reference store is meant for.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    savepoints: RwLock<Vec<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transactional for MemoryStore {
    fn begin_transaction(&self) -> StoreResult<()> {
        let snapshot = self.tables.read().expect("store lock poisoned").clone();
        self.savepoints
            .write()
            .expect("savepoint lock poisoned")
            .push(snapshot);
        trace!("begin_transaction: savepoint depth now {}", self.savepoints.read().expect("savepoint lock poisoned").len());
        Ok(())
    }

    fn end_transaction(&self) -> StoreResult<()> {
        let mut savepoints = self.savepoints.write().expect("savepoint lock poisoned");
        if savepoints.pop().is_none() {
            return Err(Error::NoOpenTransaction);
        }
        trace!("end_transaction: savepoint depth now {}", savepoints.len());
        Ok(())
    }

    fn rollback_transaction(&self) -> StoreResult<()> {
        let mut savepoints = self.savepoints.write().expect("savepoint lock poisoned");
        let Some(snapshot) = savepoints.pop() else {
            return Err(Error::NoOpenTransaction);
        };
        *self.tables.write().expect("store lock poisoned") = snapshot;
        debug!("rollback_transaction: restored savepoint, depth now {}", savepoints.len());
        Ok(())
    }
}

impl RecordingStore for MemoryStore {
    fn add_recording(&self, recording: RecordingRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        trace!("add_recording: {}", recording.id);
        tables.recordings.insert(recording.id, recording);
        Ok(())
    }

    fn update_recording_by_id(&self, recording: RecordingRecord) -> StoreResult<()> {
        self.add_recording(recording)
    }

    fn get_recording_by_id(
        &self,
        id: RecordingId,
        with_features: bool,
    ) -> StoreResult<RecordingRecord> {
        let tables = self.tables.read().expect("store lock poisoned");
        let record = tables.recordings.get(&id).cloned().ok_or(Error::NotFound)?;
        if with_features {
            Ok(record)
        } else {
            Ok(RecordingRecord {
                id: record.id,
                features: None,
            })
        }
    }

    fn add_recording_features(
        &self,
        id: RecordingId,
        features: StoredRecordingFeatures,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        let record = tables.recordings.entry(id).or_insert(RecordingRecord {
            id,
            features: None,
        });
        record.features = Some(features);
        Ok(())
    }

    fn update_recording_features_by_id(
        &self,
        id: RecordingId,
        features: StoredRecordingFeatures,
    ) -> StoreResult<()> {
        self.add_recording_features(id, features)
    }
}

impl CategoryStore for MemoryStore {
    fn add_category(&self, name: &str) -> StoreResult<CategoryId> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        if let Some(&id) = tables.category_names.get(name) {
            trace!("add_category: '{name}' already exists as {id}");
            return Ok(id);
        }
        let id = Ulid::new();
        tables.categories.insert(
            id,
            CategoryRecord {
                id,
                name: name.to_string(),
            },
        );
        tables.category_names.insert(name.to_string(), id);
        debug!("add_category: created '{name}' as {id}");
        Ok(id)
    }

    fn get_category_by_id(
        &self,
        id: CategoryId,
        with_description: bool,
    ) -> StoreResult<(CategoryRecord, Option<CategoryDescription>)> {
        let tables = self.tables.read().expect("store lock poisoned");
        let record = tables.categories.get(&id).cloned().ok_or(Error::NotFound)?;
        let description = if with_description {
            tables.category_descriptions.get(&id).cloned()
        } else {
            None
        };
        Ok((record, description))
    }

    fn add_category_description(
        &self,
        id: CategoryId,
        description: CategoryDescription,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        if !tables.categories.contains_key(&id) {
            return Err(Error::NotFound);
        }
        tables.category_descriptions.insert(id, description);
        Ok(())
    }

    fn update_category_description(
        &self,
        id: CategoryId,
        description: CategoryDescription,
    ) -> StoreResult<()> {
        self.add_category_description(id, description)
    }

    fn get_recording_to_category_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
    ) -> StoreResult<Option<f64>> {
        let tables = self.tables.read().expect("store lock poisoned");
        Ok(tables
            .recording_to_category_scores
            .get(&(category, recording))
            .copied())
    }

    fn update_recording_to_category_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
        score: f64,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        tables
            .recording_to_category_scores
            .insert((category, recording), score);
        Ok(())
    }

    fn get_category_example_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
    ) -> StoreResult<Option<ExampleScore>> {
        let tables = self.tables.read().expect("store lock poisoned");
        Ok(tables
            .category_example_scores
            .get(&(category, recording))
            .copied())
    }

    fn update_category_example_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
        score: ExampleScore,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        tables
            .category_example_scores
            .insert((category, recording), score);
        Ok(())
    }

    fn get_category_example_recording_ids(
        &self,
        category: CategoryId,
        limit: usize,
    ) -> StoreResult<Vec<RecordingId>> {
        let tables = self.tables.read().expect("store lock poisoned");
        Ok(tables
            .category_example_scores
            .iter()
            .filter(|((c, _), _)| *c == category)
            .map(|((_, r), _)| *r)
            .take(limit)
            .collect())
    }

    fn get_recording_ids_in_category(
        &self,
        category: CategoryId,
        min_score: f64,
        max_score: f64,
        limit: usize,
    ) -> StoreResult<Vec<RecordingId>> {
        let tables = self.tables.read().expect("store lock poisoned");
        let mut matches: Vec<(RecordingId, f64)> = tables
            .recording_to_category_scores
            .iter()
            .filter(|((c, _), &score)| *c == category && score >= min_score && score <= max_score)
            .map(|((_, r), &score)| (*r, score))
            .collect();
        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches.into_iter().take(limit).map(|(r, _)| r).collect())
    }
}
