use crate::{error::GroupingError, group::Group, volume::Volume};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions in {0:?}")]
    InconsistentDimensions(PathBuf),

    #[error("Could not decode pixel data of {0:?}")]
    Undecodable(PathBuf),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error(transparent)]
    Grouping(#[from] GroupingError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Build the volume of one series, stacking its files in spatial order.
    ///
    /// The in-plane spacing comes from the files, the slice spacing from
    /// the group.
    pub fn load_group(group: &mut Group) -> Result<Volume, VolumeLoaderError> {
        let paths = group.ordered_filenames()?;
        let data = Self::load_from_file_paths(&paths)?;
        let (x, y) = group
            .first()
            .map(|record| (record.spacing[0], record.spacing[1]))
            .unwrap_or((1.0, 1.0));
        debug!(
            "Loaded group {} as volume {:?}, spacing ({}, {}, {})",
            group.index(),
            data.dim(),
            x,
            y,
            group.zspacing()
        );
        Ok(Volume::new(data, (x, y, group.zspacing())))
    }

    /// Stack the first frame of each file, in the order given.
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
    ) -> Result<Array3<u16>, VolumeLoaderError> {
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let images: Vec<Array2<u16>> = paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                let object = open_file(path)?;
                Self::decode_image(&object)
                    .ok_or_else(|| VolumeLoaderError::Undecodable(path.to_path_buf()))
            })
            .collect::<Result<_, _>>()?;

        Self::validate_dimensions(&images, paths)?;
        Ok(Self::build_volume_array(&images))
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .inspect_err(|e| warn!("Pixel data decoding failed: {}", e))
            .ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_dimensions(
        images: &[Array2<u16>],
        paths: &[impl AsRef<Path>],
    ) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        match images.iter().position(|img| img.dim() != first_dim) {
            Some(i) => Err(VolumeLoaderError::InconsistentDimensions(
                paths[i].as_ref().to_path_buf(),
            )),
            None => Ok(()),
        }
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let mut volume = Array3::<u16>::zeros((images.len(), height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrouperConfig;
    use std::sync::Arc;

    #[test]
    fn stacks_in_given_order() {
        let images = vec![Array2::from_elem((2, 2), 1u16), Array2::from_elem((2, 2), 2u16)];
        let volume = VolumeLoader::build_volume_array(&images);
        assert_eq!(volume.dim(), (2, 2, 2));
        assert_eq!(volume[[1, 0, 0]], 2);
    }

    #[test]
    fn mismatched_sizes_name_the_file() {
        let images = vec![Array2::<u16>::zeros((2, 2)), Array2::<u16>::zeros((3, 2))];
        let paths = ["a.dcm", "b.dcm"];
        match VolumeLoader::validate_dimensions(&images, &paths) {
            Err(VolumeLoaderError::InconsistentDimensions(path)) => {
                assert_eq!(path, PathBuf::from("b.dcm"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn empty_group_is_a_grouping_error() {
        let mut group = Group::new(3, "empty", Arc::new(GrouperConfig::default()));
        assert!(matches!(
            VolumeLoader::load_group(&mut group),
            Err(VolumeLoaderError::Grouping(GroupingError::EmptyGroup { group_index: 3 }))
        ));
    }
}
