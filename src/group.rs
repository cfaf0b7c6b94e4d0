use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::GrouperConfig;
use crate::enums::DerivedCollision;
use crate::error::{GroupingError, SortError};
use crate::record::{DedupKey, SliceRecord};
use crate::sorter::{IppSorter, SequenceSorter, SortEntry, SortedSequence};

/// Result of offering a slice to a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    Added,
    /// A DERIVED slice took the place of one with the same image number.
    Replaced(Arc<SliceRecord>),
    /// Another slice already occupies this position.
    Rejected,
}

/// Slices believed to form one 3D series.
#[derive(Debug, Clone)]
pub struct Group {
    index: usize,
    title: String,
    slices: BTreeMap<DedupKey, Arc<SliceRecord>>,
    slice_count: u32,
    zspacing: f64,
    first: Option<Arc<SliceRecord>>,
    config: Arc<GrouperConfig>,
}

impl Group {
    pub fn new(index: usize, title: impl Into<String>, config: Arc<GrouperConfig>) -> Self {
        Self {
            index,
            title: title.into(),
            slices: BTreeMap::new(),
            slice_count: 0,
            zspacing: 1.0,
            first: None,
            config,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of slices, counting every frame of multi-frame files.
    pub fn slice_count(&self) -> u32 {
        self.slice_count
    }

    pub fn zspacing(&self) -> f64 {
        self.zspacing
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// First slice inserted into this group.
    pub fn first(&self) -> Option<&Arc<SliceRecord>> {
        self.first.as_ref()
    }

    /// Store a slice unless its position is already taken. Returns `false`
    /// on a position clash, leaving the group untouched.
    pub fn insert(&mut self, record: impl Into<Arc<SliceRecord>>) -> bool {
        self.insert_outcome(record) != Insertion::Rejected
    }

    pub fn insert_outcome(&mut self, record: impl Into<Arc<SliceRecord>>) -> Insertion {
        let record = record.into();
        let key = DedupKey::for_record(&record);

        let replaced = match self.slices.get(&key) {
            None => None,
            Some(_) if !record.is_derived() => return Insertion::Rejected,
            Some(_) if self.config.derived_collision == DerivedCollision::Reject => {
                return Insertion::Rejected;
            }
            Some(existing) => Some(existing.clone()),
        };

        if let Some(old) = &replaced {
            warn!(
                "Derived slice {:?} replaces {:?} (image number {:?}) in group {}",
                record.path, old.path, old.image_number, self.index
            );
            self.slice_count -= old.frame_count;
        }
        self.slice_count += record.frame_count;
        if self.first.is_none() {
            self.first = Some(record.clone());
        }
        debug!(
            "Added slice {:?} (image {:?}) to group {}",
            record.path, record.image_number, self.index
        );
        self.slices.insert(key, record);

        match replaced {
            Some(old) => Insertion::Replaced(old),
            None => Insertion::Added,
        }
    }

    /// Whether a slice with the same dedup key is already stored.
    pub fn occupies(&self, record: &SliceRecord) -> bool {
        self.slices.contains_key(&DedupKey::for_record(record))
    }

    /// All slices in storage order.
    pub fn list(&self) -> Vec<Arc<SliceRecord>> {
        self.slices.values().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<SliceRecord>> {
        self.slices.values()
    }

    /// Slices ordered by image number; ties fall back to axis position.
    pub fn hand_sorted_list(&self) -> Vec<Arc<SliceRecord>> {
        let mut list = self.list();
        list.sort_by(|a, b| {
            a.image_number
                .cmp(&b.image_number)
                .then_with(|| a.axis_position().total_cmp(&b.axis_position()))
        });
        list
    }

    /// Distance along the plane axis between the first two hand-sorted
    /// slices, or 1.0 when there are fewer than two.
    pub fn recompute_spacing(&mut self) {
        let list = self.hand_sorted_list();
        self.zspacing = match list.as_slice() {
            [first, second, ..] => {
                let axis = first.orientation.spacing_axis();
                (first.position[axis] - second.position[axis]).abs()
            }
            _ => 1.0,
        };
        debug!("Group {} z spacing is {}", self.index, self.zspacing);
    }

    /// Middle slice of the hand-sorted list.
    pub fn sample(&self) -> Option<Arc<SliceRecord>> {
        let list = self.hand_sorted_list();
        list.get(list.len() / 2).cloned()
    }

    /// File paths in spatial order, using the built-in sorter.
    pub fn ordered_filenames(&mut self) -> Result<Vec<PathBuf>, GroupingError> {
        let sorter = IppSorter::new(self.config.spacing_tolerance);
        self.ordered_filenames_with(&sorter)
    }

    /// File paths in spatial order. Updates the z spacing from the sorter,
    /// or from the slice positions when the sorter cannot tell.
    pub fn ordered_filenames_with(
        &mut self,
        sorter: &dyn SequenceSorter,
    ) -> Result<Vec<PathBuf>, GroupingError> {
        if self.slices.is_empty() {
            return Err(GroupingError::EmptyGroup {
                group_index: self.index,
            });
        }

        let manufacturer = self.first.as_ref().and_then(|r| r.manufacturer.as_deref());
        if self.config.sorts_by_filename(manufacturer) {
            debug!(
                "Group {} comes from {:?}, ordering by filename",
                self.index, manufacturer
            );
            let mut paths: Vec<PathBuf> = self.records().map(|r| r.path.clone()).collect();
            paths.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
            self.recompute_spacing();
            return Ok(paths);
        }

        let (paths, spacing) = {
            let entries: Vec<SortEntry<'_>> = self
                .records()
                .map(|record| SortEntry {
                    path: &record.path,
                    position: record.position,
                    direction_cosines: record.direction_cosines,
                    orientation: &record.orientation,
                })
                .collect();
            let sorted = self.run_sorter(sorter, &entries)?;
            let paths: Vec<PathBuf> = sorted
                .order
                .iter()
                .map(|&i| entries[i].path.to_path_buf())
                .collect();
            (paths, sorted.spacing)
        };

        match spacing {
            Some(spacing) if spacing > 0.0 => {
                debug!("Sorter computed z spacing {} for group {}", spacing, self.index);
                self.zspacing = spacing;
            }
            _ => {
                debug!(
                    "Sorter gave no z spacing for group {}, using slice positions",
                    self.index
                );
                self.recompute_spacing();
            }
        }
        Ok(paths)
    }

    fn run_sorter(
        &self,
        sorter: &dyn SequenceSorter,
        entries: &[SortEntry<'_>],
    ) -> Result<SortedSequence, GroupingError> {
        let result = match sorter.sort(entries) {
            Err(SortError::PathEncoding(path)) => {
                warn!(
                    "Sorter rejected path {:?} in group {}, retrying with re-encoded paths",
                    path, self.index
                );
                let reencoded: Vec<PathBuf> = entries
                    .iter()
                    .map(|e| PathBuf::from(e.path.to_string_lossy().into_owned()))
                    .collect();
                let alternate: Vec<SortEntry<'_>> = entries
                    .iter()
                    .zip(&reencoded)
                    .map(|(entry, path)| SortEntry { path, ..*entry })
                    .collect();
                sorter.sort(&alternate)
            }
            other => other,
        };

        let sorted = result.and_then(|sorted| check_order(sorted, entries.len()));
        sorted.map_err(|source| GroupingError::Sort {
            group_index: self.index,
            slice_count: self.slice_count,
            source,
        })
    }
}

/// A backend must return a permutation of the entries it was given.
fn check_order(sorted: SortedSequence, len: usize) -> Result<SortedSequence, SortError> {
    let mut seen = vec![false; len];
    let permutation = sorted.order.len() == len
        && sorted
            .order
            .iter()
            .all(|&i| i < len && !std::mem::replace(&mut seen[i], true));
    if permutation {
        Ok(sorted)
    } else {
        Err(SortError::Backend(format!(
            "expected a permutation of {} slices, got {:?}",
            len, sorted.order
        )))
    }
}
