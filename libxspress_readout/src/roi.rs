//! Region of interest extraction from ROI-packed spectra.
//!
//! In ROI mode the hardware packs each element's spectrum row as the configured regions in
//! order (one bin per virtual scaler, `width` bins per partial spectrum) with the out-of-window
//! counts in the final bin. Grade slices follow the resolution grade: one slice, a bad/good
//! pair, or sixteen grades from worst (0) to best (15).
use ndarray::{s, Array2, ArrayView2};

use super::constants::{
    ALL_GRADE_SLICES, BEST_EIGHT_GRADE_BIN, FIRST_PEAK_GRADE, OUT_REGION_NAME,
    THRESHOLD_BAD_SLICE, THRESHOLD_GOOD_SLICE,
};
use super::parameters::{Region, RegionType, ResolutionGrade};

/// One region reading of one element in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReading {
    pub element: usize,
    pub name: String,
    /// Corrected value; for all grades the cumulative value of the eight best grades
    pub value: f64,
    /// Below-threshold value when a grade threshold is set
    pub bad: Option<f64>,
    /// Cumulative values over the best 1..=16 grades when all grades are recorded
    pub grades: Option<Vec<f64>>,
    /// Corrected partial spectrum [grade][bin], placed at the region's bins of a full spectrum
    pub spectrum: Option<Array2<f64>>,
    /// Whether the value adds into the cross-element sum
    pub counts_to_ff: bool,
}

impl RegionReading {
    fn scaler(element: usize, name: &str, value: f64, counts_to_ff: bool) -> Self {
        Self {
            element,
            name: name.to_string(),
            value,
            bad: None,
            grades: None,
            spectrum: None,
            counts_to_ff,
        }
    }
}

/// Settings shared by every element of one acquisition
#[derive(Debug, Clone, Copy)]
pub struct RoiLayout {
    pub grade: ResolutionGrade,
    pub region_type: RegionType,
    pub full_mca_size: usize,
}

fn row_sum(row: ndarray::ArrayView1<u32>) -> f64 {
    row.iter().map(|v| *v as f64).sum()
}

/// Scale good in-window counts up for the good events lost to the bad slice
fn threshold_scale(all_events: f64, good_in: f64, good_out: f64) -> f64 {
    let seen = good_in + good_out;
    if seen > 0.0 {
        all_events / seen
    } else {
        0.0
    }
}

/// Cumulative sums over the best grades: bin i holds grades 15-i..=15
fn cumulative_grades(values: &[f64]) -> Vec<f64> {
    let mut sums = Vec::with_capacity(ALL_GRADE_SLICES);
    let mut running = 0.0;
    for bin in 0..ALL_GRADE_SLICES {
        running += values[ALL_GRADE_SLICES - 1 - bin];
        sums.push(running);
    }
    sums
}

fn virtual_scaler(
    packed: &ArrayView2<u32>,
    layout: &RoiLayout,
    element: usize,
    name: &str,
    position: usize,
    factor: f64,
    counts_to_ff: bool,
) -> RegionReading {
    let last = packed.ncols() - 1;
    match layout.grade {
        ResolutionGrade::None => RegionReading::scaler(
            element,
            name,
            packed[[0, position]] as f64 * factor,
            counts_to_ff,
        ),
        ResolutionGrade::Threshold(_) => {
            let good_in = packed[[THRESHOLD_GOOD_SLICE, position]] as f64;
            let good_out = packed[[THRESHOLD_GOOD_SLICE, last]] as f64;
            let all_events = row_sum(packed.row(THRESHOLD_BAD_SLICE))
                + row_sum(packed.row(THRESHOLD_GOOD_SLICE));
            let mut reading = RegionReading::scaler(
                element,
                name,
                good_in * threshold_scale(all_events, good_in, good_out) * factor,
                counts_to_ff,
            );
            // bad counts are reported raw, for interest only
            reading.bad = Some(packed[[THRESHOLD_BAD_SLICE, position]] as f64);
            reading
        }
        ResolutionGrade::AllGrades => {
            let in_window: Vec<f64> = (0..ALL_GRADE_SLICES)
                .map(|g| packed[[g, position]] as f64)
                .collect();
            let out_window: Vec<f64> = (0..ALL_GRADE_SLICES)
                .map(|g| packed[[g, last]] as f64)
                .collect();
            let sums_in = cumulative_grades(&in_window);
            let sums_out = cumulative_grades(&out_window);
            let total = sums_in[ALL_GRADE_SLICES - 1] + sums_out[ALL_GRADE_SLICES - 1];
            let grades: Vec<f64> = sums_in
                .iter()
                .zip(sums_out.iter())
                .map(|(i, o)| i * threshold_scale(total, *i, *o) * factor)
                .collect();
            let mut reading = RegionReading::scaler(
                element,
                name,
                grades[BEST_EIGHT_GRADE_BIN],
                counts_to_ff,
            );
            reading.grades = Some(grades);
            reading
        }
    }
}

fn partial_spectrum(
    packed: &ArrayView2<u32>,
    layout: &RoiLayout,
    element: usize,
    region: &Region,
    position: usize,
    factor: f64,
) -> RegionReading {
    let width = region.width();
    let slices = packed.slice(s![.., position..position + width]);
    let mut spectrum = Array2::<f64>::zeros((packed.nrows(), layout.full_mca_size));
    spectrum
        .slice_mut(s![.., region.start..region.end])
        .assign(&slices.mapv(|v| v as f64 * factor));

    let mut reading = RegionReading::scaler(element, &region.name, 0.0, true);
    match layout.grade {
        ResolutionGrade::None => {
            reading.value = row_sum(slices.row(0)) * factor;
        }
        ResolutionGrade::Threshold(_) => {
            let last = packed.ncols() - 1;
            let good_in = row_sum(slices.row(THRESHOLD_GOOD_SLICE));
            let good_out = packed[[THRESHOLD_GOOD_SLICE, last]] as f64;
            let all_events = row_sum(packed.row(THRESHOLD_BAD_SLICE))
                + row_sum(packed.row(THRESHOLD_GOOD_SLICE));
            reading.value = good_in * threshold_scale(all_events, good_in, good_out) * factor;
            reading.bad = Some(row_sum(slices.row(THRESHOLD_BAD_SLICE)) * factor);
        }
        ResolutionGrade::AllGrades => {
            reading.value = (FIRST_PEAK_GRADE..ALL_GRADE_SLICES)
                .map(|g| row_sum(slices.row(g)))
                .sum::<f64>()
                * factor;
        }
    }
    reading.spectrum = Some(spectrum);
    reading
}

/// Extract every region of one element, plus the OUT reading when grades are not all recorded.
///
/// `packed` is the element's [grade][bin] row; `factor` its dead-time factor.
pub fn extract_regions(
    packed: ArrayView2<u32>,
    regions: &[Region],
    layout: &RoiLayout,
    element: usize,
    factor: f64,
) -> Vec<RegionReading> {
    let mut readings = Vec::with_capacity(regions.len() + 1);
    let mut position = 0;
    for region in regions {
        match layout.region_type {
            RegionType::VirtualScaler => {
                readings.push(virtual_scaler(
                    &packed,
                    layout,
                    element,
                    &region.name,
                    position,
                    factor,
                    true,
                ));
                position += 1;
            }
            RegionType::PartialSpectrum => {
                readings.push(partial_spectrum(
                    &packed, layout, element, region, position, factor,
                ));
                position += region.width();
            }
        }
    }

    let last = packed.ncols() - 1;
    if layout.grade != ResolutionGrade::AllGrades && position < last {
        readings.push(virtual_scaler(
            &packed,
            layout,
            element,
            OUT_REGION_NAME,
            last,
            factor,
            false,
        ));
    }
    readings
}
