use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::GrouperConfig;
use crate::error::GroupingError;
use crate::group::Group;
use crate::patient::PatientPartition;
use crate::record::{GroupIndices, PatientKey, SliceRecord};

/// Sorts slices of one loading session into patients and series.
///
/// ```
/// # use dicom_grouper::{Grouper, Orientation, SliceRecord};
/// let mut grouper = Grouper::default();
/// for (i, z) in [0.0, 10.0, 20.0].into_iter().enumerate() {
///     let record = SliceRecord::new(format!("{i}.dcm"))
///         .with_patient("DOE^JOHN", "1")
///         .with_series(Some(2), Some("CT HEAD"))
///         .with_orientation(Orientation::Axial)
///         .with_image_number(i as i32 + 1)
///         .with_position([0.0, 0.0, z]);
///     grouper.add(record).expect("should have grouped the slice");
/// }
/// grouper.finalize().expect("should have finalized");
/// let patients = grouper.patients();
/// assert_eq!(patients[0].groups()[0].slice_count(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Grouper {
    patients: BTreeMap<PatientKey, PatientPartition>,
    indices: GroupIndices,
    config: Arc<GrouperConfig>,
    finalized: bool,
    unrepaired: Vec<PatientKey>,
}

impl Grouper {
    pub fn new(config: GrouperConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &GrouperConfig {
        &self.config
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn add(&mut self, record: SliceRecord) -> Result<(), GroupingError> {
        if self.finalized {
            return Err(GroupingError::Finalized(record.path));
        }
        let key = record.patient_key();
        let config = &self.config;
        let patient = self.patients.entry(key).or_insert_with_key(|key| {
            debug!("New patient {}", key);
            PatientPartition::new(key.clone(), config.clone())
        });
        patient.add(record, &mut self.indices)?;
        Ok(())
    }

    /// Run the per-patient repair pass. Call once, after the last `add`.
    /// Every patient is processed; the first failure is returned. A
    /// patient whose repair fails keeps its unrepaired groups and is
    /// listed by [`Grouper::unrepaired_patients`].
    pub fn finalize(&mut self) -> Result<(), GroupingError> {
        if self.finalized {
            warn!("Grouping session was already finalized");
            return Ok(());
        }
        self.finalized = true;

        let mut first_error = None;
        for patient in self.patients.values_mut() {
            if let Err(e) = patient.update(&mut self.indices) {
                error!("Failed to repair groups of patient {}: {}", patient.key(), e);
                self.unrepaired.push(patient.key().clone());
                first_error.get_or_insert(e);
            }
        }
        info!(
            "Grouped {} patients into {} series",
            self.patients.len(),
            self.patients
                .values()
                .map(PatientPartition::group_count)
                .sum::<usize>()
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Patients left with their ingestion-time groups by a failed repair.
    pub fn unrepaired_patients(&self) -> &[PatientKey] {
        &self.unrepaired
    }

    /// Patients with at least one series, ordered by name.
    pub fn patients(&self) -> Vec<&PatientPartition> {
        self.patients
            .values()
            .filter(|patient| patient.group_count() > 0)
            .collect()
    }

    /// The series with the most slices over all patients.
    pub fn largest_group(&self) -> Option<&Group> {
        self.patients
            .values()
            .flat_map(|patient| patient.groups())
            .fold(None, |largest: Option<&Group>, group| match largest {
                Some(current) if current.slice_count() >= group.slice_count() => Some(current),
                _ => Some(group),
            })
    }

    pub fn group_mut(&mut self, index: usize) -> Option<&mut Group> {
        self.patients
            .values_mut()
            .flat_map(PatientPartition::groups_mut)
            .find(|group| group.index() == index)
    }
}
