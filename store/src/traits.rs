//! The persistent-store contract: a key-value/relational abstraction the
//! engine crate never depends on directly, realised here over an
//! in-memory reference implementation ([`crate::memory::MemoryStore`]).
//! Generalised from `storage::db::crud`'s per-table CRUD methods
//! (`Song::create`/`read`/`update`/`delete`), but synchronous rather than
//! `surrealdb`-async: this crate has no async runtime in its dependency
//! stack and the contract itself has no inherent need for one.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::errors::StoreResult;

pub type RecordingId = Ulid;
pub type CategoryId = Ulid;

/// The serialised form of a recording's per-file features (§3's
/// `RecordingFeatures`): two serialised GMMs plus scalar tempo and
/// dynamic-range values. Immutable once committed; mutation implies a
/// full rebuild via `update_recording_features_by_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredRecordingFeatures {
    pub tempo_bpm: f64,
    pub length_seconds: f64,
    pub dynamic_range_mean: f64,
    pub dynamic_range_rms: f64,
    pub timbre_gmm_json: String,
    pub chroma_gmm_json: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordingRecord {
    pub id: RecordingId,
    pub features: Option<StoredRecordingFeatures>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
}

/// Six serialised model strings (§3's `CategoryDescription`); any may be
/// absent before the category learner has run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryDescription {
    pub positive_timbre_gmm_json: Option<String>,
    pub negative_timbre_gmm_json: Option<String>,
    pub positive_chroma_gmm_json: Option<String>,
    pub negative_chroma_gmm_json: Option<String>,
    pub positive_classifier_json: Option<String>,
    pub negative_classifier_json: Option<String>,
}

/// `> 0.5` marks a positive example, `<= 0.5` a negative one (§6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExampleScore(pub f64);

impl ExampleScore {
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0.5
    }
}

pub trait RecordingStore: Send + Sync {
    /// Idempotent by primary key: an existing id is overwritten.
    fn add_recording(&self, recording: RecordingRecord) -> StoreResult<()>;
    fn update_recording_by_id(&self, recording: RecordingRecord) -> StoreResult<()>;
    fn get_recording_by_id(
        &self,
        id: RecordingId,
        with_features: bool,
    ) -> StoreResult<RecordingRecord>;
    fn add_recording_features(
        &self,
        id: RecordingId,
        features: StoredRecordingFeatures,
    ) -> StoreResult<()>;
    fn update_recording_features_by_id(
        &self,
        id: RecordingId,
        features: StoredRecordingFeatures,
    ) -> StoreResult<()>;
}

pub trait CategoryStore: Send + Sync {
    /// Upsert by unique category name; returns the (possibly pre-existing)
    /// category's id.
    fn add_category(&self, name: &str) -> StoreResult<CategoryId>;
    fn get_category_by_id(
        &self,
        id: CategoryId,
        with_description: bool,
    ) -> StoreResult<(CategoryRecord, Option<CategoryDescription>)>;
    fn add_category_description(
        &self,
        id: CategoryId,
        description: CategoryDescription,
    ) -> StoreResult<()>;
    fn update_category_description(
        &self,
        id: CategoryId,
        description: CategoryDescription,
    ) -> StoreResult<()>;

    fn get_recording_to_category_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
    ) -> StoreResult<Option<f64>>;
    fn update_recording_to_category_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
        score: f64,
    ) -> StoreResult<()>;

    fn get_category_example_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
    ) -> StoreResult<Option<ExampleScore>>;
    fn update_category_example_score(
        &self,
        category: CategoryId,
        recording: RecordingId,
        score: ExampleScore,
    ) -> StoreResult<()>;
    fn get_category_example_recording_ids(
        &self,
        category: CategoryId,
        limit: usize,
    ) -> StoreResult<Vec<RecordingId>>;

    /// Recordings scored into `category` with `min_score <= score <=
    /// max_score`, ordered by score descending and capped at `limit`.
    fn get_recording_ids_in_category(
        &self,
        category: CategoryId,
        min_score: f64,
        max_score: f64,
        limit: usize,
    ) -> StoreResult<Vec<RecordingId>>;
}

/// Nestable transactions over savepoints (spec.md §6): `begin_transaction`
/// pushes a savepoint, `end_transaction` commits the most recent one (a
/// no-op on an in-memory store, since writes already apply directly), and
/// `rollback_transaction` undoes only back to that savepoint, leaving any
/// enclosing transaction's earlier writes intact.
pub trait Transactional {
    fn begin_transaction(&self) -> StoreResult<()>;
    fn end_transaction(&self) -> StoreResult<()>;
    fn rollback_transaction(&self) -> StoreResult<()>;
}
