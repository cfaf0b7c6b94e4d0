//! Geometry based ordering of slice files.
//!
//! [`IppSorter`] orders slices by their Image Position (Patient) projected
//! onto the slice normal, the way DICOM toolkits sort a single series.
//! Other backends can be plugged in through [`SequenceSorter`].

use std::path::Path;

use tracing::debug;

use crate::enums::{Orientation, slice_normal};
use crate::error::SortError;

/// One slice handed to a sorter.
#[derive(Debug, Clone, Copy)]
pub struct SortEntry<'a> {
    pub path: &'a Path,
    pub position: [f64; 3],
    pub direction_cosines: Option<[f64; 6]>,
    pub orientation: &'a Orientation,
}

/// Result of a sort: `order` lists indices into the sorted entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedSequence {
    pub order: Vec<usize>,
    /// Inter-slice spacing, when every gap agrees.
    pub spacing: Option<f64>,
}

pub trait SequenceSorter {
    fn sort(&self, entries: &[SortEntry<'_>]) -> Result<SortedSequence, SortError>;
}

#[derive(Debug, Clone, Copy)]
pub struct IppSorter {
    tolerance: f64,
}

impl Default for IppSorter {
    fn default() -> Self {
        Self::new(1e-10)
    }
}

impl IppSorter {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn normal(&self, entries: &[SortEntry<'_>]) -> Result<[f64; 3], SortError> {
        let first = &entries[0];
        match first.direction_cosines {
            Some(reference) => {
                let shared = entries.iter().all(|entry| {
                    entry.direction_cosines.is_some_and(|cosines| {
                        cosines
                            .iter()
                            .zip(reference.iter())
                            .all(|(a, b)| (a - b).abs() <= 1e-6)
                    })
                });
                if !shared {
                    return Err(SortError::MixedOrientation);
                }
                Ok(slice_normal(reference))
            }
            None => {
                if entries.iter().any(|entry| entry.direction_cosines.is_some()) {
                    return Err(SortError::MixedOrientation);
                }
                let mut normal = [0.0; 3];
                normal[first.orientation.spacing_axis()] = 1.0;
                Ok(normal)
            }
        }
    }
}

impl SequenceSorter for IppSorter {
    fn sort(&self, entries: &[SortEntry<'_>]) -> Result<SortedSequence, SortError> {
        if entries.is_empty() {
            return Ok(SortedSequence {
                order: Vec::new(),
                spacing: None,
            });
        }

        let normal = self.normal(entries)?;
        let mut distances: Vec<(usize, f64)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let p = entry.position;
                (i, p[0] * normal[0] + p[1] * normal[1] + p[2] * normal[2])
            })
            .collect();
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));

        for pair in distances.windows(2) {
            if pair[0].1 == pair[1].1 {
                return Err(SortError::DuplicatePosition {
                    first: entries[pair[0].0].path.to_path_buf(),
                    second: entries[pair[1].0].path.to_path_buf(),
                });
            }
        }

        let gaps: Vec<f64> = distances.windows(2).map(|p| p[1].1 - p[0].1).collect();
        let spacing = gaps.first().copied().filter(|&first| {
            gaps.iter().all(|gap| (gap - first).abs() <= self.tolerance)
        });
        debug!(
            "Sorted {} slices along normal {:?}, spacing {:?}",
            entries.len(),
            normal,
            spacing
        );

        Ok(SortedSequence {
            order: distances.into_iter().map(|(i, _)| i).collect(),
            spacing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const AXIAL_COSINES: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn entries<'a>(
        paths: &'a [PathBuf],
        z: &[f64],
        orientation: &'a Orientation,
        cosines: Option<[f64; 6]>,
    ) -> Vec<SortEntry<'a>> {
        paths
            .iter()
            .zip(z)
            .map(|(path, &z)| SortEntry {
                path,
                position: [0.0, 0.0, z],
                direction_cosines: cosines,
                orientation,
            })
            .collect()
    }

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("{i}.dcm"))).collect()
    }

    #[test]
    fn orders_along_normal_with_spacing() {
        let paths = paths(4);
        let axial = Orientation::Axial;
        let input = entries(&paths, &[20.0, 0.0, 30.0, 10.0], &axial, Some(AXIAL_COSINES));
        let sorted = IppSorter::default().sort(&input).unwrap();
        assert_eq!(sorted.order, vec![1, 3, 0, 2]);
        assert_eq!(sorted.spacing, Some(10.0));
    }

    #[test]
    fn uneven_gaps_give_no_spacing() {
        let paths = paths(3);
        let axial = Orientation::Axial;
        let input = entries(&paths, &[0.0, 1.0, 3.0], &axial, None);
        let sorted = IppSorter::default().sort(&input).unwrap();
        assert_eq!(sorted.order, vec![0, 1, 2]);
        assert_eq!(sorted.spacing, None);
    }

    #[test]
    fn coincident_slices_fail() {
        let paths = paths(2);
        let axial = Orientation::Axial;
        let input = entries(&paths, &[5.0, 5.0], &axial, None);
        assert!(matches!(
            IppSorter::default().sort(&input),
            Err(SortError::DuplicatePosition { .. })
        ));
    }

    #[test]
    fn mixed_cosines_fail() {
        let paths = paths(2);
        let axial = Orientation::Axial;
        let mut input = entries(&paths, &[0.0, 1.0], &axial, Some(AXIAL_COSINES));
        input[1].direction_cosines = Some([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]);
        assert!(matches!(
            IppSorter::default().sort(&input),
            Err(SortError::MixedOrientation)
        ));
    }

    #[test]
    fn sagittal_without_cosines_uses_x() {
        let paths = paths(2);
        let sagittal = Orientation::Sagittal;
        let input = vec![
            SortEntry {
                path: &paths[0],
                position: [4.0, 0.0, 0.0],
                direction_cosines: None,
                orientation: &sagittal,
            },
            SortEntry {
                path: &paths[1],
                position: [2.0, 0.0, 9.0],
                direction_cosines: None,
                orientation: &sagittal,
            },
        ];
        let sorted = IppSorter::default().sort(&input).unwrap();
        assert_eq!(sorted.order, vec![1, 0]);
        assert_eq!(sorted.spacing, Some(2.0));
    }
}
