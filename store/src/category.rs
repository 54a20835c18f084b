//! Conversions between the engine's in-memory feature/model types and the
//! textual representations the persistent store actually holds.

use cadence_engine::category::{CategoryModel, OneClassGaussian, RecordingFeatures};
use cadence_engine::gmm::Gmm;

use crate::errors::{Error, StoreResult};
use crate::traits::{CategoryDescription, StoredRecordingFeatures};

#[must_use]
pub fn to_stored_features(features: &RecordingFeatures) -> StoredRecordingFeatures {
    StoredRecordingFeatures {
        tempo_bpm: features.tempo_bpm,
        length_seconds: features.length_seconds,
        dynamic_range_mean: features.dynamic_range_mean,
        dynamic_range_rms: features.dynamic_range_rms,
        timbre_gmm_json: features.timbre.to_json(),
        chroma_gmm_json: features.chroma.to_json(),
    }
}

pub fn from_stored_features(stored: &StoredRecordingFeatures) -> StoreResult<RecordingFeatures> {
    let timbre = Gmm::from_json(&stored.timbre_gmm_json).map_err(|_| Error::NotFound)?;
    let chroma = Gmm::from_json(&stored.chroma_gmm_json).map_err(|_| Error::NotFound)?;
    Ok(RecordingFeatures {
        timbre,
        chroma,
        tempo_bpm: stored.tempo_bpm,
        length_seconds: stored.length_seconds,
        dynamic_range_mean: stored.dynamic_range_mean,
        dynamic_range_rms: stored.dynamic_range_rms,
    })
}

#[must_use]
pub fn to_description(model: &CategoryModel) -> CategoryDescription {
    CategoryDescription {
        positive_timbre_gmm_json: Some(model.positive_timbre.to_json()),
        negative_timbre_gmm_json: Some(model.negative_timbre.to_json()),
        positive_chroma_gmm_json: Some(model.positive_chroma.to_json()),
        negative_chroma_gmm_json: Some(model.negative_chroma.to_json()),
        positive_classifier_json: Some(model.positive_classifier.to_json()),
        negative_classifier_json: Some(model.negative_classifier.to_json()),
    }
}

pub fn from_description(description: &CategoryDescription) -> StoreResult<CategoryModel> {
    let positive_timbre = description
        .positive_timbre_gmm_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| Gmm::from_json(s).map_err(|_| Error::NotFound))?;
    let negative_timbre = description
        .negative_timbre_gmm_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| Gmm::from_json(s).map_err(|_| Error::NotFound))?;
    let positive_chroma = description
        .positive_chroma_gmm_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| Gmm::from_json(s).map_err(|_| Error::NotFound))?;
    let negative_chroma = description
        .negative_chroma_gmm_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| Gmm::from_json(s).map_err(|_| Error::NotFound))?;
    let positive_classifier = description
        .positive_classifier_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| OneClassGaussian::from_json(s).map_err(|_| Error::NotFound))?;
    let negative_classifier = description
        .negative_classifier_json
        .as_deref()
        .ok_or(Error::NotFound)
        .and_then(|s| OneClassGaussian::from_json(s).map_err(|_| Error::NotFound))?;

    Ok(CategoryModel {
        positive_timbre,
        negative_timbre,
        positive_chroma,
        negative_chroma,
        positive_classifier,
        negative_classifier,
    })
}
