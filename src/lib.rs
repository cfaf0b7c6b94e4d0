//! # DICOM-grouper library
//!
//! This crate sorts a loose pile of DICOM files into patients and
//! coherent 3D series, and orders the slices of each series in space.
//!
//! Slices arrive one at a time as [`SliceRecord`]s, in any order. The
//! [`Grouper`] routes them by patient; each [`PatientPartition`] groups
//! them by study, series number and acquisition plane. Two kinds of broken
//! vendor metadata are repaired along the way:
//!  - Two slices of one series claiming the same position are kept in
//!    parallel groups instead of one overwriting the other.
//!  - Series where every slice ended up alone (series and image numbers
//!    swapped) are merged back by plane, study and spatial contiguity
//!    when the session is finalized.
//!
//! Each [`Group`] hands out its files in spatial order together with the
//! slice spacing, ready to be stacked into a [`Volume`].
//!
//! The engine is single threaded: parse headers in parallel if you like,
//! but feed the records to one [`Grouper`] from one place.
//!
//! # Examples
//!
//! ## Grouping a directory and loading the largest series
//!
//! ```no_run
//! # use dicom_grouper::{GrouperConfig, VolumeLoader, scan_directory};
//! let mut grouper = scan_directory("dicom", true, GrouperConfig::default(), |_, _| {})
//!     .expect("should have grouped files from directory");
//! for patient in grouper.patients() {
//!     for group in patient.groups() {
//!         println!("{} {}: {} slices", patient.key(), group.title(), group.slice_count());
//!     }
//! }
//! let index = grouper.largest_group().expect("should have found a series").index();
//! let group = grouper.group_mut(index).expect("should still hold the series");
//! let volume = VolumeLoader::load_group(group).expect("should have loaded the series");
//! println!("{:?} voxels of {:?} mm", volume.dim(), volume.spacing);
//! ```

pub mod config;
pub mod enums;
pub mod error;
pub mod group;
pub mod grouper;
pub mod patient;
pub mod reader;
pub mod record;
pub mod sorter;
pub mod volume;
pub mod volume_loader;

pub use config::GrouperConfig;
pub use enums::{DerivedCollision, Orientation, RepairAdjacency};
pub use error::{ConfigError, GroupingError, SortError};
pub use group::{Group, Insertion};
pub use grouper::Grouper;
pub use patient::PatientPartition;
pub use reader::{ReaderError, read_slice_record, scan_directory};
pub use record::{GroupIndices, GroupKey, PatientKey, SliceRecord};
pub use sorter::{IppSorter, SequenceSorter, SortEntry, SortedSequence};
pub use volume::Volume;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
