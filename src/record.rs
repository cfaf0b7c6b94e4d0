use std::path::PathBuf;

use crate::enums::Orientation;

/// Image Type value marking a slice that was computed from other images.
pub const DERIVED: &str = "DERIVED";

/// Metadata snapshot of one DICOM file, as handed over by the parser.
///
/// Records are immutable once built; the grouping engine shares them
/// behind `Arc`s while moving them between groups.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRecord {
    pub patient_name: String,
    pub patient_id: String,
    pub study_id: String,
    pub series_number: Option<i32>,
    pub series_description: Option<String>,
    pub manufacturer: Option<String>,
    pub image_number: Option<i32>,
    pub position: [f64; 3],
    pub direction_cosines: Option<[f64; 6]>,
    pub orientation: Orientation,
    pub image_type: Vec<String>,
    pub path: PathBuf,
    pub frame_count: u32,
    pub spacing: [f64; 3],
}

impl SliceRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            patient_name: String::new(),
            patient_id: String::new(),
            study_id: String::new(),
            series_number: None,
            series_description: None,
            manufacturer: None,
            image_number: None,
            position: [0.0; 3],
            direction_cosines: None,
            orientation: Orientation::default(),
            image_type: Vec::new(),
            path: path.into(),
            frame_count: 1,
            spacing: [1.0; 3],
        }
    }

    pub fn with_patient(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.patient_name = name.into();
        self.patient_id = id.into();
        self
    }

    pub fn with_study(mut self, study_id: impl Into<String>) -> Self {
        self.study_id = study_id.into();
        self
    }

    pub fn with_series(mut self, number: Option<i32>, description: Option<&str>) -> Self {
        self.series_number = number;
        self.series_description = description.map(str::to_string);
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_image_number(mut self, number: i32) -> Self {
        self.image_number = Some(number);
        self
    }

    pub fn with_position(mut self, position: [f64; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_direction_cosines(mut self, cosines: [f64; 6]) -> Self {
        self.direction_cosines = Some(cosines);
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_image_type<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_type = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_frame_count(mut self, frames: u32) -> Self {
        self.frame_count = frames;
        self
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn is_derived(&self) -> bool {
        self.image_type.iter().any(|value| value.trim() == DERIVED)
    }

    pub fn patient_key(&self) -> PatientKey {
        PatientKey {
            name: self.patient_name.clone(),
            id: self.patient_id.clone(),
        }
    }

    /// Position component along the acquisition axis of this slice's plane.
    pub fn axis_position(&self) -> f64 {
        self.position[self.orientation.spacing_axis()]
    }

    pub(crate) fn group_key(&self, dedup_index: u32) -> GroupKey {
        GroupKey::Natural {
            patient_name: self.patient_name.clone(),
            study_id: self.study_id.clone(),
            series_number: self.series_number,
            orientation: self.orientation.clone(),
            dedup_index,
        }
    }
}

/// Identity of a patient: name first so that keys sort for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatientKey {
    pub name: String,
    pub id: String,
}

impl std::fmt::Display for PatientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Key of a group inside a patient partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Key derived from the slice's own metadata at ingestion time.
    Natural {
        patient_name: String,
        study_id: String,
        series_number: Option<i32>,
        orientation: Orientation,
        dedup_index: u32,
    },
    /// Series rebuilt by the singleton repair; `run` counts contiguous
    /// stretches within one plane and study.
    Merged {
        study_id: String,
        orientation: Orientation,
        run: usize,
    },
}

/// Key under which a group stores a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum DedupKey {
    Position([u64; 3]),
    ImageNumber(Option<i32>),
}

impl DedupKey {
    pub(crate) fn for_record(record: &SliceRecord) -> Self {
        if record.is_derived() {
            DedupKey::ImageNumber(record.image_number)
        } else {
            // -0.0 and 0.0 are the same position
            DedupKey::Position(record.position.map(|c| (c + 0.0).to_bits()))
        }
    }
}

/// Hands out group indices in creation order for one ingestion session.
#[derive(Debug, Default)]
pub struct GroupIndices {
    next: usize,
}

impl GroupIndices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&mut self) -> usize {
        let index = self.next;
        self.next += 1;
        index
    }
}
