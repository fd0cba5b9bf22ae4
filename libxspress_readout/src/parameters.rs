//! Shapes of the detector configuration.
//!
//! These are the data structures a configuration collaborator imports and exports. They are
//! plain serde structures; validation happens when the [ElementRegistry](crate::registry::ElementRegistry)
//! takes a snapshot at arm time.
use serde::{Deserialize, Serialize};

use super::constants::{
    ALL_GRADE_SLICES, DEFAULT_CLOCK_PERIOD, DEFAULT_FULL_MCA_BITS, NO_GRADE_SLICES,
    THRESHOLD_GRADE_SLICES,
};

/// Which data the detector reads out per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadoutMode {
    #[default]
    ScalersOnly,
    FullMca,
    Roi,
}

/// Granularity of the energy resolution grades recorded for each energy bin.
///
/// Threshold carries the grade threshold programmed into the hardware (0..=16); events at or
/// above the threshold land in the "good" slice, the rest in the "bad" slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionGrade {
    #[default]
    None,
    Threshold(u8),
    AllGrades,
}

impl ResolutionGrade {
    /// Number of grade slices stored per energy bin
    pub fn slice_count(&self) -> usize {
        match self {
            Self::None => NO_GRADE_SLICES,
            Self::Threshold(_) => THRESHOLD_GRADE_SLICES,
            Self::AllGrades => ALL_GRADE_SLICES,
        }
    }
}

/// How each region of interest is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegionType {
    /// One integrated count per region
    #[default]
    VirtualScaler,
    /// The slice of the spectrum covered by the region
    PartialSpectrum,
}

/// Selects the dead-time model. This is a property of the hardware generation, so every
/// element must carry parameters of the same model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeadtimeModel {
    Cubic,
    #[default]
    Ratio,
}

/// Per-element dead-time coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum DeadtimeParams {
    /// Legacy non-paralyzable model. The in-window process dead time is in seconds.
    Cubic { process_dead_time_in_window: f64 },
    /// Ratio model. `alpha` and `beta` are the all-event process dead time offset (s) and
    /// energy gradient (s/eV); `tau` is the in-window process dead time (s).
    Ratio { alpha: f64, beta: f64, tau: f64 },
}

impl DeadtimeParams {
    pub fn model(&self) -> DeadtimeModel {
        match self {
            Self::Cubic { .. } => DeadtimeModel::Cubic,
            Self::Ratio { .. } => DeadtimeModel::Ratio,
        }
    }

    /// All-event process dead time at the given energy; zero energy or gradient means the offset alone
    pub fn all_event_dead_time(&self, energy: f64) -> f64 {
        match self {
            Self::Cubic {
                process_dead_time_in_window,
            } => *process_dead_time_in_window,
            Self::Ratio { alpha, beta, .. } => {
                if *beta == 0.0 || energy == 0.0 {
                    *alpha
                } else {
                    alpha + beta * energy
                }
            }
        }
    }
}

impl Default for DeadtimeParams {
    fn default() -> Self {
        Self::Ratio {
            alpha: 3.4e-7,
            beta: 0.0,
            tau: 1.8e-7,
        }
    }
}

/// A region of interest over the half-open bin range [start, end)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub fn new(name: &str, start: usize, end: usize) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    /// Number of bins in the region; zero when end does not exceed start
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// Configuration of a single detector element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorElementConfig {
    pub index: usize,
    pub name: String,
    pub window_low: usize,
    pub window_high: usize,
    pub excluded: bool,
    pub deadtime: DeadtimeParams,
    pub regions: Vec<Region>,
}

impl DetectorElementConfig {
    pub fn new(index: usize, deadtime: DeadtimeParams) -> Self {
        Self {
            index,
            name: format!("element{index}"),
            window_low: 0,
            window_high: (1 << DEFAULT_FULL_MCA_BITS) - 1,
            excluded: false,
            deadtime,
            regions: Vec::new(),
        }
    }
}

/// Switches that change what is reported, not how it is corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeControls {
    /// Only report the cross-element sum
    pub only_ff: bool,
    /// Report the four raw counters and the correction factor per element
    pub include_raw_counters: bool,
    /// Read and keep the raw spectra whatever the readout mode
    pub always_record_raw_spectra: bool,
}

/// The full detector configuration: elements plus the global mode and grade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorParameters {
    pub elements: Vec<DetectorElementConfig>,
    pub mode: ReadoutMode,
    pub grade: ResolutionGrade,
    pub region_type: RegionType,
    pub deadtime_model: DeadtimeModel,
    /// Report spectra and regions without dead-time correction
    pub save_raw_spectrum: bool,
    /// Add a sum of all element spectra to full spectrum records
    pub sum_all_elements: bool,
    pub full_mca_bits: u32,
    /// Seconds per live clock tick
    pub clock_period: f64,
    /// Energy (eV) used with the dead-time gradient
    pub deadtime_energy: f64,
    pub controls: RuntimeControls,
}

impl Default for DetectorParameters {
    fn default() -> Self {
        Self {
            elements: (0..9)
                .map(|idx| DetectorElementConfig::new(idx, DeadtimeParams::default()))
                .collect(),
            mode: ReadoutMode::default(),
            grade: ResolutionGrade::default(),
            region_type: RegionType::default(),
            deadtime_model: DeadtimeModel::default(),
            save_raw_spectrum: false,
            sum_all_elements: false,
            full_mca_bits: DEFAULT_FULL_MCA_BITS,
            clock_period: DEFAULT_CLOCK_PERIOD,
            deadtime_energy: 0.0,
            controls: RuntimeControls::default(),
        }
    }
}
