use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::enums::{DerivedCollision, RepairAdjacency};
use crate::error::ConfigError;

/// Prefix of environment variables overriding file settings, e.g.
/// `DICOM_GROUPER__MAX_DEDUP_INDEX=8`.
pub const ENV_PREFIX: &str = "DICOM_GROUPER";

/// Tunables of the grouping engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GrouperConfig {
    /// Largest difference at which the sorter still treats two slice gaps
    /// as the same spacing.
    pub spacing_tolerance: f64,
    /// Highest dedup index tried before an insertion gives up.
    pub max_dedup_index: u32,
    /// Neighbouring slices are contiguous when their gap is at most this
    /// many declared slice spacings.
    pub adjacency_factor: f64,
    pub repair_adjacency: RepairAdjacency,
    pub derived_collision: DerivedCollision,
    /// Vendors whose files are ordered by filename instead of geometry.
    pub filename_sorted_manufacturers: Vec<String>,
    /// Title of groups whose slices carry no series description.
    pub untitled_group: String,
}

impl Default for GrouperConfig {
    fn default() -> Self {
        Self {
            spacing_tolerance: 1e-10,
            max_dedup_index: 64,
            adjacency_factor: 2.0,
            repair_adjacency: RepairAdjacency::default(),
            derived_collision: DerivedCollision::default(),
            filename_sorted_manufacturers: vec!["Koning".to_string()],
            untitled_group: "Untitled series".to_string(),
        }
    }
}

impl GrouperConfig {
    /// Load settings from an optional TOML file, overridden by
    /// `DICOM_GROUPER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Reading grouper configuration from {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("filename_sorted_manufacturers"),
            )
            .build()?;

        let config: GrouperConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spacing_tolerance.is_nan() || self.spacing_tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "spacing_tolerance must be non-negative, got {}",
                self.spacing_tolerance
            )));
        }
        if self.adjacency_factor.is_nan() || self.adjacency_factor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "adjacency_factor must be positive, got {}",
                self.adjacency_factor
            )));
        }
        Ok(())
    }

    pub(crate) fn sorts_by_filename(&self, manufacturer: Option<&str>) -> bool {
        manufacturer.is_some_and(|name| {
            self.filename_sorted_manufacturers
                .iter()
                .any(|quirky| quirky == name.trim())
        })
    }
}
