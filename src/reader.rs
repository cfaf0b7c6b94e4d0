//! Reading slice metadata from DICOM files on disk.

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::object::{DefaultDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GrouperConfig;
use crate::enums::Orientation;
use crate::grouper::Grouper;
use crate::record::SliceRecord;

/// Media Storage SOP Class of a DICOMDIR index file.
const MEDIA_STORAGE_DIRECTORY: &str = "1.2.840.10008.1.3.10";

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("{0:?} is a DICOMDIR, not an image")]
    DicomDir(PathBuf),
}

/// Read the metadata of one file, stopping before the pixel data.
pub fn read_slice_record(path: impl AsRef<Path>) -> Result<SliceRecord, ReaderError> {
    let path = path.as_ref();
    let object = OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)?;

    let sop_class = object.meta().media_storage_sop_class_uid.trim_end_matches('\0');
    if sop_class == MEDIA_STORAGE_DIRECTORY {
        return Err(ReaderError::DicomDir(path.to_path_buf()));
    }
    Ok(record_from_object(&object, path))
}

fn record_from_object(object: &DefaultDicomObject, path: &Path) -> SliceRecord {
    let mut record = SliceRecord::new(path);
    record.patient_name = string(object, tags::PATIENT_NAME).unwrap_or_default();
    record.patient_id = string(object, tags::PATIENT_ID).unwrap_or_default();
    record.study_id = string(object, tags::STUDY_ID).unwrap_or_default();
    record.series_number = int(object, tags::SERIES_NUMBER);
    record.series_description = string(object, tags::SERIES_DESCRIPTION);
    record.manufacturer = string(object, tags::MANUFACTURER);
    record.image_number = int(object, tags::INSTANCE_NUMBER);
    record.frame_count = int(object, tags::NUMBER_OF_FRAMES)
        .and_then(|frames| u32::try_from(frames).ok())
        .unwrap_or(1)
        .max(1);
    record.image_type = object
        .element(tags::IMAGE_TYPE)
        .ok()
        .and_then(|e| e.to_multi_str().ok())
        .map(|values| values.iter().map(|v| v.trim().to_string()).collect())
        .unwrap_or_default();

    match floats::<3>(object, tags::IMAGE_POSITION_PATIENT) {
        Some(position) => record.position = position,
        None => warn!("{:?} has no image position, assuming origin", path),
    }

    record.direction_cosines = floats::<6>(object, tags::IMAGE_ORIENTATION_PATIENT);
    if let Some(cosines) = record.direction_cosines {
        record.orientation = Orientation::from_direction_cosines(cosines);
    }

    let pixel_spacing = floats::<2>(object, tags::PIXEL_SPACING).unwrap_or([1.0, 1.0]);
    let slice_spacing = float(object, tags::SPACING_BETWEEN_SLICES)
        .or_else(|| float(object, tags::SLICE_THICKNESS))
        .filter(|spacing| *spacing > 0.0)
        .unwrap_or(1.0);
    record.spacing = [pixel_spacing[0], pixel_spacing[1], slice_spacing];

    record
}

fn string(object: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    (!value.is_empty()).then(|| value.to_string())
}

fn int(object: &DefaultDicomObject, tag: Tag) -> Option<i32> {
    object.element(tag).ok()?.to_int::<i32>().ok()
}

fn float(object: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

fn floats<const N: usize>(object: &DefaultDicomObject, tag: Tag) -> Option<[f64; N]> {
    let values = object.element(tag).ok()?.to_multi_float64().ok()?;
    values.get(..N)?.try_into().ok()
}

/// List the files below `dir`, descending into subdirectories when
/// `recursive` is set.
pub fn collect_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ReaderError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)?.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Group every DICOM file below `dir`.
///
/// Headers are parsed in parallel; the records are then fed one by one
/// into a single [`Grouper`], which is finalized before returning.
/// Files that cannot be read are logged and skipped. A patient whose
/// repair fails keeps its unrepaired series and is listed in
/// [`Grouper::unrepaired_patients`]. `progress` receives
/// `(done, total)` after each file.
pub fn scan_directory(
    dir: impl AsRef<Path>,
    recursive: bool,
    config: GrouperConfig,
    mut progress: impl FnMut(usize, usize),
) -> Result<Grouper, ReaderError> {
    let dir = dir.as_ref();
    let files = collect_files(dir, recursive)?;
    info!("Reading {} files from {:?}", files.len(), dir);

    let results: Vec<_> = files.par_iter().map(read_slice_record).collect();

    let total = files.len();
    let mut grouper = Grouper::new(config);
    let mut grouped = 0;
    for (done, (path, result)) in files.iter().zip(results).enumerate() {
        match result {
            Ok(record) => match grouper.add(record) {
                Ok(()) => grouped += 1,
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            },
            Err(ReaderError::DicomDir(_)) => debug!("Skipping DICOMDIR {:?}", path),
            Err(e) => warn!("Skipping {:?}: {}", path, e),
        }
        progress(done + 1, total);
    }

    info!("Grouping {} of {} files", grouped, total);
    if let Err(e) = grouper.finalize() {
        warn!(
            "Keeping unrepaired series of {} patients: {}",
            grouper.unrepaired_patients().len(),
            e
        );
    }
    Ok(grouper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dcm"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.dcm"), b"").unwrap();

        assert_eq!(collect_files(dir.path(), true).unwrap().len(), 2);
        assert_eq!(
            collect_files(dir.path(), false).unwrap(),
            vec![dir.path().join("a.dcm")]
        );
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a dicom file").unwrap();
        fs::write(dir.path().join("empty.dcm"), b"").unwrap();

        let mut calls = Vec::new();
        let grouper = scan_directory(dir.path(), true, GrouperConfig::default(), |done, total| {
            calls.push((done, total))
        })
        .unwrap();
        assert!(grouper.patients().is_empty());
        assert!(grouper.is_finalized());
        assert_eq!(calls, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_directory(&missing, true, GrouperConfig::default(), |_, _| {}),
            Err(ReaderError::Io(_))
        ));
    }
}
