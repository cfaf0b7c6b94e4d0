use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a geometry sequence sorter backend.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("Sorter could not represent path {0:?}")]
    PathEncoding(PathBuf),

    #[error("Slices do not share one orientation")]
    MixedOrientation,

    #[error("Slices {first:?} and {second:?} lie at the same position")]
    DuplicatePosition { first: PathBuf, second: PathBuf },

    #[error("Sorter backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("Failed to order group {group_index} ({slice_count} slices)")]
    Sort {
        group_index: usize,
        slice_count: u32,
        #[source]
        source: SortError,
    },

    #[error(
        "No free dedup slot for patient {patient}, study {study_id}, series {series_number:?} after {attempts} attempts"
    )]
    DedupExhausted {
        patient: String,
        study_id: String,
        series_number: Option<i32>,
        attempts: u32,
    },

    #[error("Group {group_index} holds no slices")]
    EmptyGroup { group_index: usize },

    #[error("Repair for patient {patient} kept {found} of {expected} slices")]
    RepairMismatch {
        patient: String,
        expected: u32,
        found: u32,
    },

    #[error("Grouping session is finalized, slice {0:?} was not added")]
    Finalized(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}
