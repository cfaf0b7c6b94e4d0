use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;

use crate::enums::Orientation;

/// Voxel data of one series, indexed `(depth, height, width)`.
#[derive(Debug, Default)]
pub struct Volume {
    pub data: Array3<u16>,
    /// Voxel size as `(x, y, z)`.
    pub spacing: (f64, f64, f64),
}

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f64, f64, f64)) -> Self {
        Self { data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// 2D cut through the volume at `index` along the plane's axis, or
    /// `None` when the index is out of range or the plane unknown.
    pub fn slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, u16>> {
        let (depth, height, width) = self.dim();
        // Stacking runs along the first array axis, whatever the plane.
        let slice = match orientation {
            Orientation::Axial | Orientation::Oblique if index < depth => {
                self.data.slice(s![index, .., ..])
            }
            Orientation::Coronal if index < height => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal if index < width => self.data.slice(s![.., .., index]),
            _ => return None,
        };
        Some(slice)
    }
}
