use serde::Deserialize;

/// Anatomical plane a slice was acquired in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Orientation {
    Sagittal,
    Coronal,
    Axial,
    Oblique,
    /// Any label the upstream parser could not map to a plane.
    Unknown(String),
}

/// Minimum normal component for a plane to count as one of the three
/// anatomical planes rather than oblique.
const OBLIQUITY_THRESHOLD: f64 = 0.8;

impl Orientation {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "SAGITTAL" => Orientation::Sagittal,
            "CORONAL" => Orientation::Coronal,
            "AXIAL" => Orientation::Axial,
            "OBLIQUE" => Orientation::Oblique,
            _ => Orientation::Unknown(label.to_string()),
        }
    }

    /// Classify a slice plane from its Image Orientation (Patient) row and
    /// column direction cosines.
    pub fn from_direction_cosines(cosines: [f64; 6]) -> Self {
        let normal = slice_normal(cosines);
        let (axis, magnitude) = normal
            .iter()
            .map(|c| c.abs())
            .enumerate()
            .fold((0, 0.0), |best, (i, c)| if c > best.1 { (i, c) } else { best });

        if magnitude <= OBLIQUITY_THRESHOLD {
            return Orientation::Oblique;
        }
        match axis {
            0 => Orientation::Sagittal,
            1 => Orientation::Coronal,
            _ => Orientation::Axial,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Orientation::Sagittal => "SAGITTAL",
            Orientation::Coronal => "CORONAL",
            Orientation::Axial => "AXIAL",
            Orientation::Oblique => "OBLIQUE",
            Orientation::Unknown(label) => label,
        }
    }

    /// Position component that varies between slices of this plane, for
    /// recognized planes only.
    pub fn axis(&self) -> Option<usize> {
        match self {
            Orientation::Sagittal => Some(0),
            Orientation::Coronal => Some(1),
            Orientation::Axial | Orientation::Oblique => Some(2),
            Orientation::Unknown(_) => None,
        }
    }

    /// Like [`Orientation::axis`] but falls back to the axial axis.
    pub fn spacing_axis(&self) -> usize {
        self.axis().unwrap_or(2)
    }

    pub fn is_recognized(&self) -> bool {
        self.axis().is_some()
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::Unknown(String::new())
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub(crate) fn slice_normal(cosines: [f64; 6]) -> [f64; 3] {
    let [rx, ry, rz, cx, cy, cz] = cosines;
    [ry * cz - rz * cy, rz * cx - rx * cz, rx * cy - ry * cx]
}

/// How the singleton repair decides that two neighbouring slices belong
/// to the same rebuilt series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAdjacency {
    /// Compare each slice with the next one along the plane axis.
    #[default]
    Consecutive,
    /// Merge every singleton of one plane and study into a single series.
    MergeAll,
}

/// What a DERIVED slice does when its image number is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedCollision {
    /// Replace the stored slice.
    #[default]
    Overwrite,
    /// Refuse it, sending it to the next dedup slot like a position clash.
    Reject,
}
