//! Per-patient grouping and the two metadata repairs.
//!
//! Position clashes inside one nominal series are split off into
//! parallel groups as slices arrive. Series where every slice landed in
//! its own group, typically because series and image numbers were
//! swapped upstream, are merged back once all slices are in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GrouperConfig;
use crate::enums::{Orientation, RepairAdjacency};
use crate::error::GroupingError;
use crate::group::{Group, Insertion};
use crate::record::{GroupIndices, GroupKey, PatientKey, SliceRecord};

#[derive(Debug, Clone)]
pub struct PatientPartition {
    key: PatientKey,
    groups: BTreeMap<GroupKey, Group>,
    slice_count: u32,
    sample: Option<Arc<SliceRecord>>,
    config: Arc<GrouperConfig>,
}

impl PatientPartition {
    pub fn new(key: PatientKey, config: Arc<GrouperConfig>) -> Self {
        Self {
            key,
            groups: BTreeMap::new(),
            slice_count: 0,
            sample: None,
            config,
        }
    }

    pub fn key(&self) -> &PatientKey {
        &self.key
    }

    /// Slices ingested so far, counting frames.
    pub fn slice_count(&self) -> u32 {
        self.slice_count
    }

    #[cfg(test)]
    pub(crate) fn force_slice_count(&mut self, count: u32) {
        self.slice_count = count;
    }

    /// First slice seen for this patient.
    pub fn sample(&self) -> Option<&Arc<SliceRecord>> {
        self.sample.as_ref()
    }

    pub fn add(
        &mut self,
        record: impl Into<Arc<SliceRecord>>,
        indices: &mut GroupIndices,
    ) -> Result<GroupKey, GroupingError> {
        self.add_with_dedup_index(record, 0, indices)
    }

    /// Place a slice in the first group, starting at `dedup_index`, that
    /// has no other slice at its position. Returns the key of that group.
    pub fn add_with_dedup_index(
        &mut self,
        record: impl Into<Arc<SliceRecord>>,
        dedup_index: u32,
        indices: &mut GroupIndices,
    ) -> Result<GroupKey, GroupingError> {
        let record = record.into();
        if self.sample.is_none() {
            self.sample = Some(record.clone());
        }

        let config = &self.config;
        for dedup_index in dedup_index..=config.max_dedup_index {
            let key = record.group_key(dedup_index);
            let group = self.groups.entry(key.clone()).or_insert_with(|| {
                let group = Group::new(
                    indices.next_index(),
                    group_title(&record, config),
                    config.clone(),
                );
                debug!("Created group {} for {:?}", group.index(), key);
                group
            });

            match group.insert_outcome(record.clone()) {
                Insertion::Rejected => {
                    debug!(
                        "Slice {:?} clashes with a slice at {:?} in group {}, trying dedup index {}",
                        record.path,
                        record.position,
                        group.index(),
                        dedup_index + 1
                    );
                    continue;
                }
                Insertion::Replaced(old) => self.slice_count -= old.frame_count,
                Insertion::Added => {}
            }
            self.slice_count += record.frame_count;
            group.recompute_spacing();
            return Ok(key);
        }

        let attempts = (dedup_index..=config.max_dedup_index).count() as u32;
        warn!(
            "Dropping slice {:?}: no free position slot in {} attempts",
            record.path, attempts
        );
        Err(GroupingError::DedupExhausted {
            patient: self.key.to_string(),
            study_id: record.study_id.clone(),
            series_number: record.series_number,
            attempts,
        })
    }

    /// Run the repairs that need every slice of the patient.
    pub fn update(&mut self, indices: &mut GroupIndices) -> Result<(), GroupingError> {
        let group_count = self.groups.len();
        debug!(
            "Patient {}: {} slices in {} groups",
            self.key, self.slice_count, group_count
        );
        if self.slice_count as usize != group_count || group_count <= 1 {
            return Ok(());
        }

        warn!(
            "Every group of patient {} holds a single slice, series and image numbers look swapped",
            self.key
        );
        let rebuilt = self.repair_singletons(&self.groups, indices);
        let found: u32 = rebuilt.values().map(Group::slice_count).sum();
        if found != self.slice_count {
            return Err(GroupingError::RepairMismatch {
                patient: self.key.to_string(),
                expected: self.slice_count,
                found,
            });
        }
        info!(
            "Patient {}: merged {} singleton groups into {}",
            self.key,
            group_count,
            rebuilt.len()
        );
        self.groups = rebuilt;
        Ok(())
    }

    /// Merge singleton groups that share a plane and a study, splitting
    /// them where neighbouring slices are too far apart to be one series.
    /// Groups without a recognized plane pass through unchanged.
    pub fn repair_singletons(
        &self,
        groups: &BTreeMap<GroupKey, Group>,
        indices: &mut GroupIndices,
    ) -> BTreeMap<GroupKey, Group> {
        let mut rebuilt = BTreeMap::new();
        let mut candidates: BTreeMap<(Orientation, String), Vec<Arc<SliceRecord>>> =
            BTreeMap::new();

        for (key, group) in groups {
            let Some(first) = group.first() else {
                continue;
            };
            if first.orientation.is_recognized() {
                candidates
                    .entry((first.orientation.clone(), first.study_id.clone()))
                    .or_default()
                    .extend(group.records().cloned());
            } else {
                rebuilt.insert(key.clone(), group.clone());
            }
        }

        for ((orientation, study_id), mut records) in candidates {
            let axis = orientation.spacing_axis();
            records.sort_by(|a, b| {
                a.image_number
                    .cmp(&b.image_number)
                    .then_with(|| a.position[axis].total_cmp(&b.position[axis]))
            });

            let mut runs: Vec<Group> = Vec::new();
            let mut previous: Option<&Arc<SliceRecord>> = None;
            for record in &records {
                let contiguous = previous.is_some_and(|prev| self.adjacent(prev, record, axis));
                // a taken slot opens a new run rather than replacing its slice
                let placed = contiguous
                    && runs.last_mut().is_some_and(|run| {
                        !run.occupies(record)
                            && run.insert_outcome(record.clone()) == Insertion::Added
                    });
                if !placed {
                    let mut run = Group::new(
                        indices.next_index(),
                        group_title(record, &self.config),
                        self.config.clone(),
                    );
                    run.insert(record.clone());
                    runs.push(run);
                }
                previous = Some(record);
            }

            debug!(
                "{} slices of study {} ({}) form {} series",
                records.len(),
                study_id,
                orientation,
                runs.len()
            );
            for (run, mut group) in runs.into_iter().enumerate() {
                group.recompute_spacing();
                let key = GroupKey::Merged {
                    study_id: study_id.clone(),
                    orientation: orientation.clone(),
                    run,
                };
                rebuilt.insert(key, group);
            }
        }
        rebuilt
    }

    fn adjacent(&self, current: &SliceRecord, next: &SliceRecord, axis: usize) -> bool {
        match self.config.repair_adjacency {
            RepairAdjacency::MergeAll => true,
            RepairAdjacency::Consecutive => {
                let gap = (next.position[axis] - current.position[axis]).abs();
                gap <= current.spacing[2] * self.config.adjacency_factor
            }
        }
    }

    /// Non-empty groups, ordered by title (descending) then creation.
    pub fn groups(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().filter(|g| !g.is_empty()).collect();
        groups.sort_by(|a, b| b.title().cmp(a.title()).then(a.index().cmp(&b.index())));
        groups
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut Group> {
        self.groups.values_mut().filter(|g| !g.is_empty())
    }

    pub fn group(&self, key: &GroupKey) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn group_count(&self) -> usize {
        self.groups.values().filter(|g| !g.is_empty()).count()
    }
}

fn group_title(record: &SliceRecord, config: &GrouperConfig) -> String {
    match record.series_description.as_deref().map(str::trim) {
        Some(description) if !description.is_empty() => description.to_string(),
        _ => config.untitled_group.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(config: GrouperConfig) -> PatientPartition {
        PatientPartition::new(
            PatientKey {
                name: "DOE^JANE".to_string(),
                id: "42".to_string(),
            },
            Arc::new(config),
        )
    }

    fn axial(name: &str, series: i32, image: i32, z: f64) -> SliceRecord {
        SliceRecord::new(name)
            .with_patient("DOE^JANE", "42")
            .with_study("S1")
            .with_series(Some(series), Some("T1 AX"))
            .with_orientation(Orientation::Axial)
            .with_image_number(image)
            .with_position([0.0, 0.0, z])
            .with_spacing([0.5, 0.5, 5.0])
    }

    fn total(partition: &PatientPartition) -> u32 {
        partition.groups().iter().map(|g| g.slice_count()).sum()
    }

    #[test]
    fn one_series_one_group() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        for i in 0..5 {
            partition
                .add(axial(&format!("{i}.dcm"), 3, i + 1, 10.0 * i as f64), &mut indices)
                .unwrap();
        }
        partition.update(&mut indices).unwrap();
        let groups = partition.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].slice_count(), 5);
        assert_eq!(groups[0].zspacing(), 10.0);
        assert_eq!(groups[0].title(), "T1 AX");
        assert_eq!(partition.sample().unwrap().path.to_str(), Some("0.dcm"));
    }

    #[test]
    fn missing_description_gets_placeholder() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        let record = axial("a.dcm", 1, 1, 0.0).with_series(Some(1), Some("  "));
        partition.add(record, &mut indices).unwrap();
        assert_eq!(partition.groups()[0].title(), "Untitled series");
    }

    #[test]
    fn position_clash_opens_next_dedup_slot() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        let first = partition.add(axial("a.dcm", 1, 1, 0.0), &mut indices).unwrap();
        let second = partition.add(axial("b.dcm", 1, 2, 0.0), &mut indices).unwrap();
        assert!(matches!(first, GroupKey::Natural { dedup_index: 0, .. }));
        assert!(matches!(second, GroupKey::Natural { dedup_index: 1, .. }));
        assert_eq!(partition.group_count(), 2);
        assert_eq!(partition.slice_count(), 2);
    }

    #[test]
    fn clashes_fill_the_first_free_slot() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        partition.add(axial("a.dcm", 1, 1, 0.0), &mut indices).unwrap();
        partition.add(axial("b.dcm", 1, 2, 0.0), &mut indices).unwrap();
        let key = partition.add(axial("c.dcm", 1, 3, 5.0), &mut indices).unwrap();
        assert!(matches!(key, GroupKey::Natural { dedup_index: 0, .. }));
    }

    #[test]
    fn explicit_start_index() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        let key = partition
            .add_with_dedup_index(axial("a.dcm", 1, 1, 0.0), 3, &mut indices)
            .unwrap();
        assert!(matches!(key, GroupKey::Natural { dedup_index: 3, .. }));
    }

    #[test]
    fn dedup_search_is_bounded() {
        let mut partition = partition(GrouperConfig {
            max_dedup_index: 1,
            ..GrouperConfig::default()
        });
        let mut indices = GroupIndices::new();
        partition.add(axial("a.dcm", 1, 1, 0.0), &mut indices).unwrap();
        partition.add(axial("b.dcm", 1, 2, 0.0), &mut indices).unwrap();
        let err = partition
            .add(axial("c.dcm", 1, 3, 0.0), &mut indices)
            .unwrap_err();
        assert!(matches!(
            err,
            GroupingError::DedupExhausted { attempts: 2, .. }
        ));
        assert_eq!(partition.slice_count(), 2);
        assert_eq!(total(&partition), 2);
    }

    #[test]
    fn swapped_numbers_are_merged() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        for (i, z) in [0.0, 5.0, 10.0].into_iter().enumerate() {
            let i = i as i32;
            partition
                .add(axial(&format!("{i}.dcm"), 100 + i, i + 1, z), &mut indices)
                .unwrap();
        }
        assert_eq!(partition.group_count(), 3);

        partition.update(&mut indices).unwrap();
        let groups = partition.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[0].zspacing(), 5.0);
    }

    #[test]
    fn derived_singletons_sharing_an_image_number_keep_every_slice() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        for (i, z) in [0.0, 5.0, 10.0].into_iter().enumerate() {
            let record = axial(&format!("{i}.dcm"), 10 + i as i32, 1, z)
                .with_image_type(["DERIVED", "SECONDARY", "MPR"]);
            partition.add(record, &mut indices).unwrap();
        }
        assert_eq!(partition.group_count(), 3);

        partition.update(&mut indices).unwrap();
        let groups = partition.groups();
        assert_eq!(groups.len(), 3);
        assert_eq!(total(&partition), 3);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn derived_singletons_with_distinct_numbers_merge() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        for (i, z) in [0.0, 5.0, 10.0].into_iter().enumerate() {
            let i = i as i32;
            let record =
                axial(&format!("{i}.dcm"), 10 + i, i + 1, z).with_image_type(["DERIVED"]);
            partition.add(record, &mut indices).unwrap();
        }
        partition.update(&mut indices).unwrap();
        assert_eq!(partition.group_count(), 1);
        assert_eq!(partition.groups()[0].slice_count(), 3);
    }

    #[test]
    fn repair_splits_at_gaps() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        let positions = [0.0, 5.0, 10.0, 200.0, 205.0];
        for (i, z) in positions.into_iter().enumerate() {
            let i = i as i32;
            partition
                .add(axial(&format!("{i}.dcm"), 50 + i, i + 1, z), &mut indices)
                .unwrap();
        }
        partition.update(&mut indices).unwrap();
        let mut sizes: Vec<usize> = partition.groups().iter().map(|g| g.len()).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 3]);
        assert_eq!(total(&partition), 5);
    }

    #[test]
    fn merge_all_ignores_gaps() {
        let mut partition = partition(GrouperConfig {
            repair_adjacency: RepairAdjacency::MergeAll,
            ..GrouperConfig::default()
        });
        let mut indices = GroupIndices::new();
        for (i, z) in [0.0, 100.0, 400.0].into_iter().enumerate() {
            let i = i as i32;
            partition
                .add(axial(&format!("{i}.dcm"), 10 + i, i + 1, z), &mut indices)
                .unwrap();
        }
        partition.update(&mut indices).unwrap();
        assert_eq!(partition.group_count(), 1);
    }

    #[test]
    fn repair_keeps_planes_and_studies_apart() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        partition.add(axial("a.dcm", 1, 1, 0.0), &mut indices).unwrap();
        partition.add(axial("b.dcm", 2, 2, 5.0), &mut indices).unwrap();
        partition
            .add(axial("c.dcm", 3, 3, 10.0).with_study("S2"), &mut indices)
            .unwrap();
        partition
            .add(
                axial("d.dcm", 4, 4, 0.0).with_orientation(Orientation::Coronal),
                &mut indices,
            )
            .unwrap();
        partition
            .add(
                axial("e.dcm", 5, 5, 0.0).with_orientation(Orientation::from_label("3D")),
                &mut indices,
            )
            .unwrap();

        partition.update(&mut indices).unwrap();
        assert_eq!(partition.group_count(), 4);
        assert_eq!(total(&partition), 5);
        let passthrough = partition
            .groups()
            .into_iter()
            .filter(|g| !g.first().unwrap().orientation.is_recognized())
            .count();
        assert_eq!(passthrough, 1);
    }

    #[test]
    fn repair_never_drops_coincident_slices() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        partition.add(axial("a.dcm", 1, 1, 0.0), &mut indices).unwrap();
        partition.add(axial("b.dcm", 2, 2, 0.0), &mut indices).unwrap();
        partition.update(&mut indices).unwrap();
        assert_eq!(partition.group_count(), 2);
        assert_eq!(total(&partition), 2);
    }

    #[test]
    fn multi_frame_groups_are_not_singletons() {
        let mut partition = partition(GrouperConfig::default());
        let mut indices = GroupIndices::new();
        partition
            .add(axial("a.dcm", 1, 1, 0.0).with_frame_count(10), &mut indices)
            .unwrap();
        partition
            .add(axial("b.dcm", 2, 1, 0.0).with_frame_count(10), &mut indices)
            .unwrap();
        partition.update(&mut indices).unwrap();
        assert_eq!(partition.group_count(), 2);
        assert_eq!(partition.slice_count(), 20);
    }
}
