use fxhash::FxHashMap;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};

use super::constants::{ALL_GRADE_SLICES, FF_BAD_NAME, FF_NAME};
use super::deadtime::{correct_scaler, correct_spectrum, RawScalers, ScalerCorrection};
use super::decoder::DecodedWindow;
use super::error::{AssemblyError, ElementFault};
use super::parameters::{ReadoutMode, RegionType, ResolutionGrade, RuntimeControls};
use super::registry::AcquisitionConfig;
use super::roi::{extract_regions, RegionReading, RoiLayout};
use super::window::FrameWindow;

/// Corrected reading of one element in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ElementReading {
    pub element: usize,
    pub name: String,
    pub value: f64,
    pub factor: f64,
    pub fault: Option<ElementFault>,
}

/// Everything reported for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub frame: u64,
    pub mode: ReadoutMode,
    /// One reading per non-excluded element
    pub elements: Vec<ElementReading>,
    /// Raw counters of every element, excluded ones included
    pub raw_counters: Vec<RawScalers>,
    /// Sum of the non-excluded element values
    pub ff: f64,
    /// Sum of the below-threshold region values; grade threshold ROI acquisitions only
    pub ff_bad: Option<f64>,
    /// Full spectra [element][bin]; excluded elements are zero rows
    pub spectra: Option<Array2<f64>>,
    /// Spectra exactly as transferred [element][grade][bin]
    pub raw_spectra: Option<Array3<u32>>,
    pub regions: Vec<RegionReading>,
    /// Sum of the corrected spectra of the non-excluded elements
    pub all_element_sum: Option<Array1<f64>>,
    /// Cumulative grade values summed over every region; all grades ROI acquisitions only
    pub grade_sums: Option<Vec<f64>>,
    pub controls: RuntimeControls,
}

impl FrameRecord {
    /// Named scalar columns suitable for plotting or ascii output
    pub fn plottable_values(&self) -> Vec<(String, f64)> {
        let mut values = Vec::new();
        if !self.controls.only_ff {
            for reading in self.elements.iter() {
                values.push((reading.name.clone(), reading.value));
            }
        }
        values.push((FF_NAME.to_string(), self.ff));
        if let Some(bad) = self.ff_bad {
            values.push((FF_BAD_NAME.to_string(), bad));
        }
        if !self.controls.only_ff {
            values.extend(self.region_totals());
        }
        if self.controls.include_raw_counters {
            for reading in self.elements.iter() {
                let raw = &self.raw_counters[reading.element];
                values.push((format!("{}_total", reading.name), raw.total as f64));
                values.push((format!("{}_reset", reading.name), raw.reset as f64));
                values.push((format!("{}_in_window", reading.name), raw.in_window as f64));
                values.push((format!("{}_live_clock", reading.name), raw.live_clock as f64));
                values.push((format!("{}_dtc_factor", reading.name), reading.factor));
            }
        }
        values
    }

    /// Region values summed across elements by region name, in configured order
    pub fn region_totals(&self) -> Vec<(String, f64)> {
        let mut order: Vec<&str> = Vec::new();
        let mut totals: FxHashMap<&str, f64> = FxHashMap::default();
        for region in self.regions.iter() {
            let total = totals.entry(region.name.as_str()).or_insert_with(|| {
                order.push(region.name.as_str());
                0.0
            });
            *total += region.value;
        }
        order
            .into_iter()
            .map(|name| (name.to_string(), totals[name]))
            .collect()
    }

    /// Elements that raised a numeric fault in this frame
    pub fn faults(&self) -> impl Iterator<Item = (usize, ElementFault)> + '_ {
        self.elements
            .iter()
            .filter_map(|r| r.fault.map(|f| (r.element, f)))
    }
}

/// Correct the scalers of every element in one frame; excluded elements get a zero correction
pub fn correct_frame(scalers: ArrayView2<u32>, config: &AcquisitionConfig) -> Vec<(RawScalers, ScalerCorrection)> {
    config
        .elements
        .iter()
        .enumerate()
        .map(|(idx, element)| {
            let raw = RawScalers::from_counters(scalers.row(idx));
            let correction = if config.is_excluded(idx) {
                ScalerCorrection::zero()
            } else {
                correct_scaler(&raw, &element.deadtime, config.clock_period)
            };
            (raw, correction)
        })
        .collect()
}

/// Build the record of one frame from its decoded scalers [element][counter] and spectra
/// [element][grade][bin]
pub fn assemble(
    frame: u64,
    scalers: ArrayView2<u32>,
    spectra: Option<ArrayView3<u32>>,
    config: &AcquisitionConfig,
) -> Result<FrameRecord, AssemblyError> {
    if config.mode != ReadoutMode::ScalersOnly && spectra.is_none() {
        return Err(AssemblyError::MissingSpectra(config.mode));
    }
    if let Some(sp) = spectra.as_ref() {
        if sp.shape()[2] != config.mca_size {
            return Err(AssemblyError::SpectrumSizeMismatch {
                expected: config.mca_size,
                found: sp.shape()[2],
            });
        }
    }

    let corrections = correct_frame(scalers, config);
    let spectrum_factor = |idx: usize| {
        if config.save_raw_spectrum {
            1.0
        } else {
            corrections[idx].1.factor
        }
    };
    // elements whose counters cannot be trusted report 0 whatever their spectra hold
    let zeroed = |idx: usize| {
        matches!(
            corrections[idx].1.fault,
            Some(ElementFault::CorruptFrame) | Some(ElementFault::ZeroCounts)
        )
    };

    let mut record = FrameRecord {
        frame,
        mode: config.mode,
        elements: Vec::with_capacity(config.element_count()),
        raw_counters: corrections.iter().map(|(raw, _)| *raw).collect(),
        ff: 0.0,
        ff_bad: None,
        spectra: None,
        raw_spectra: None,
        regions: Vec::new(),
        all_element_sum: None,
        grade_sums: None,
        controls: config.controls,
    };

    match (config.mode, spectra.as_ref()) {
        (ReadoutMode::Roi, Some(sp)) => {
            let layout = RoiLayout {
                grade: config.grade,
                region_type: config.region_type,
                full_mca_size: config.full_mca_size,
            };
            for idx in config.active_elements() {
                record.regions.extend(extract_regions(
                    sp.index_axis(Axis(0), idx),
                    &config.elements[idx].regions,
                    &layout,
                    idx,
                    spectrum_factor(idx),
                ));
            }
            if let ResolutionGrade::Threshold(_) = config.grade {
                record.ff_bad = Some(
                    record
                        .regions
                        .iter()
                        .filter(|r| r.counts_to_ff && !zeroed(r.element))
                        .filter_map(|r| r.bad)
                        .sum(),
                );
            }
            if config.grade == ResolutionGrade::AllGrades
                && config.region_type == RegionType::VirtualScaler
            {
                let mut sums = vec![0.0; ALL_GRADE_SLICES];
                for grades in record.regions.iter().filter_map(|r| r.grades.as_ref()) {
                    for (sum, value) in sums.iter_mut().zip(grades.iter()) {
                        *sum += value;
                    }
                }
                record.grade_sums = Some(sums);
            }
        }
        (ReadoutMode::FullMca, Some(sp)) => {
            let mut corrected = Array2::<f64>::zeros((config.element_count(), config.mca_size));
            for idx in config.active_elements() {
                corrected
                    .row_mut(idx)
                    .assign(&correct_spectrum(sp.slice(s![idx, 0, ..]), spectrum_factor(idx)));
            }
            if config.sum_all_elements {
                record.all_element_sum = Some(corrected.sum_axis(Axis(0)));
            }
            record.spectra = Some(corrected);
        }
        _ => (),
    }

    for idx in config.active_elements() {
        let (_, correction) = &corrections[idx];
        let value = if config.mode == ReadoutMode::Roi && !zeroed(idx) {
            record
                .regions
                .iter()
                .filter(|r| r.element == idx && r.counts_to_ff)
                .map(|r| r.value)
                .sum()
        } else {
            correction.value
        };
        record.elements.push(ElementReading {
            element: idx,
            name: config.elements[idx].name.clone(),
            value,
            factor: correction.factor,
            fault: correction.fault,
        });
    }
    record.ff = record.elements.iter().map(|r| r.value).sum();

    if config.controls.always_record_raw_spectra {
        record.raw_spectra = spectra.map(|sp| sp.to_owned());
    }

    Ok(record)
}

/// Assemble every frame of a decoded window, in frame order
pub fn assemble_window(
    window: &FrameWindow,
    decoded: &DecodedWindow,
    config: &AcquisitionConfig,
) -> Result<Vec<FrameRecord>, AssemblyError> {
    if decoded.frame_count() != window.frame_count() {
        return Err(AssemblyError::FrameCountMismatch {
            expected: window.frame_count(),
            found: decoded.frame_count(),
        });
    }
    window
        .frames()
        .enumerate()
        .map(|(offset, frame)| {
            assemble(
                frame,
                decoded.scalers.index_axis(Axis(0), offset),
                decoded
                    .spectra
                    .as_ref()
                    .map(|sp| sp.index_axis(Axis(0), offset)),
                config,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode, FrameShape};
    use crate::parameters::{DetectorParameters, Region};
    use crate::registry::ElementRegistry;
    use ndarray::Array4;
    use std::sync::Arc;

    fn scalers_for(elements: usize, rows: &[[u32; 4]]) -> Array2<u32> {
        let mut scalers = Array2::<u32>::zeros((elements, 4));
        for (idx, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                scalers[[idx, c]] = *v;
            }
        }
        scalers
    }

    fn config(registry: &ElementRegistry) -> Arc<AcquisitionConfig> {
        registry.snapshot().unwrap()
    }

    #[test]
    fn test_scalers_only_reference() {
        let registry = ElementRegistry::new(DetectorParameters::default());
        let config = config(&registry);
        let rows = vec![[10000, 50, 8000, 1000000]; 9];
        let scalers = scalers_for(9, &rows);
        let record = assemble(0, scalers.view(), None, &config).unwrap();
        assert_eq!(record.elements.len(), 9);
        assert_eq!(record.elements[0].value, 10000.0);
        assert_eq!(record.elements[0].factor, 1.25);
        assert_eq!(record.ff, 90000.0);
        assert_eq!(record.raw_counters[0].live_clock, 1000000);
        assert!(record.spectra.is_none());
    }

    #[test]
    fn test_fault_isolated_to_element() {
        let registry = ElementRegistry::new(DetectorParameters::default());
        let config = config(&registry);
        let mut rows = vec![[10000, 50, 8000, 1000000]; 9];
        rows[4] = [10000, 50, 0, 1000000];
        let scalers = scalers_for(9, &rows);
        let record = assemble(0, scalers.view(), None, &config).unwrap();
        assert_eq!(record.elements[4].value, 0.0);
        assert_eq!(record.elements[4].fault, Some(ElementFault::ZeroCounts));
        assert_eq!(record.elements[3].value, 10000.0);
        assert_eq!(record.elements[5].fault, None);
        assert_eq!(record.ff, 80000.0);
        assert_eq!(record.faults().count(), 1);
    }

    #[test]
    fn test_ff_skips_excluded() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        registry.set_excluded(2, true).unwrap();
        registry.set_excluded(7, true).unwrap();
        let config = config(&registry);
        let rows: Vec<[u32; 4]> = (0..9)
            .map(|i| [1000 + 100 * i as u32, 3, 500 + 10 * i as u32, 400000])
            .collect();
        let scalers = scalers_for(9, &rows);
        let record = assemble(5, scalers.view(), None, &config).unwrap();
        assert_eq!(record.elements.len(), 7);
        assert!(record.elements.iter().all(|r| r.element != 2 && r.element != 7));
        let sum: f64 = record.elements.iter().map(|r| r.value).sum();
        assert_eq!(record.ff, sum);
        assert_eq!(record.raw_counters.len(), 9);
    }

    #[test]
    fn test_full_mca_corrected_and_raw() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        registry.set_mode(ReadoutMode::FullMca).unwrap();
        registry.set_full_mca_bits(3).unwrap();
        registry.set_sum_all_elements(true).unwrap();
        registry.set_excluded(1, true).unwrap();
        let config = config(&registry);
        let scalers = scalers_for(9, &vec![[10000, 50, 8000, 1000000]; 9]);
        let spectra = Array3::<u32>::from_elem((9, 1, 8), 4);
        let record = assemble(0, scalers.view(), Some(spectra.view()), &config).unwrap();
        let corrected = record.spectra.as_ref().unwrap();
        assert_eq!(corrected.shape(), &[9, 8]);
        assert_eq!(corrected[[0, 3]], 5.0);
        assert_eq!(corrected[[1, 3]], 0.0);
        assert_eq!(record.all_element_sum.as_ref().unwrap()[0], 40.0);

        registry.set_save_raw_spectrum(true).unwrap();
        let config = registry.snapshot().unwrap();
        let record = assemble(0, scalers.view(), Some(spectra.view()), &config).unwrap();
        assert_eq!(record.spectra.as_ref().unwrap()[[0, 3]], 4.0);
        // the scaler is still corrected
        assert_eq!(record.elements[0].value, 10000.0);
    }

    #[test]
    fn test_missing_spectra() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        registry.set_mode(ReadoutMode::FullMca).unwrap();
        let config = config(&registry);
        let scalers = scalers_for(9, &[]);
        assert!(matches!(
            assemble(0, scalers.view(), None, &config),
            Err(AssemblyError::MissingSpectra(ReadoutMode::FullMca))
        ));
    }

    #[test]
    fn test_roi_threshold_record() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        for idx in 0..9 {
            registry
                .set_regions(idx, vec![Region::new("fe", 600, 700)])
                .unwrap();
        }
        registry
            .set_readout(ReadoutMode::Roi, ResolutionGrade::Threshold(8))
            .unwrap();
        let config = config(&registry);
        // one region plus out needs 2 channels, packed into 4 bins
        assert_eq!(config.mca_size, 4);
        let scalers = scalers_for(9, &vec![[100, 0, 100, 1000000]; 9]);
        let mut spectra = Array3::<u32>::zeros((9, 2, 4));
        for idx in 0..9 {
            spectra[[idx, 0, 0]] = 10;
            spectra[[idx, 1, 0]] = 90;
        }
        let record = assemble(2, scalers.view(), Some(spectra.view()), &config).unwrap();
        // factor 1, nothing out of window, so good scales to all events
        assert_eq!(record.elements[0].value, 100.0);
        assert_eq!(record.ff, 900.0);
        assert_eq!(record.ff_bad, Some(90.0));
        // fe and OUT per element
        assert_eq!(record.regions.len(), 18);
        assert_eq!(
            record.region_totals(),
            vec![(String::from("fe"), 900.0), (String::from("OUT"), 0.0)]
        );
        let names: Vec<String> = record.plottable_values().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&String::from("FF_bad")));
    }

    #[test]
    fn test_roi_faulted_elements_report_zero() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        for idx in 0..9 {
            registry
                .set_regions(idx, vec![Region::new("fe", 600, 700)])
                .unwrap();
        }
        registry
            .set_readout(ReadoutMode::Roi, ResolutionGrade::None)
            .unwrap();
        let mut rows = vec![[100, 0, 100, 1000000]; 9];
        // in window above total
        rows[0] = [100, 0, 200, 1000000];
        rows[1] = [100, 0, 0, 1000000];
        let scalers = scalers_for(9, &rows);
        let mut spectra = Array3::<u32>::zeros((9, 1, 4));
        for idx in 0..9 {
            spectra[[idx, 0, 0]] = 5;
        }

        for save_raw in [true, false] {
            registry.set_save_raw_spectrum(save_raw).unwrap();
            let config = config(&registry);
            let record = assemble(0, scalers.view(), Some(spectra.view()), &config).unwrap();
            assert_eq!(record.elements[0].value, 0.0);
            assert_eq!(record.elements[0].fault, Some(ElementFault::CorruptFrame));
            assert_eq!(record.elements[1].value, 0.0);
            assert_eq!(record.elements[1].fault, Some(ElementFault::ZeroCounts));
            assert_eq!(record.elements[2].value, 5.0);
            assert_eq!(record.ff, 35.0);
        }
    }

    #[test]
    fn test_roi_partial_spectra_all_grades() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        for idx in 0..9 {
            registry
                .set_regions(idx, vec![Region::new("fe", 10, 12)])
                .unwrap();
        }
        registry.set_region_type(RegionType::PartialSpectrum).unwrap();
        registry
            .set_readout(ReadoutMode::Roi, ResolutionGrade::AllGrades)
            .unwrap();
        let config = config(&registry);
        let shape = FrameShape {
            frames: 1,
            elements: 9,
            grade_slices: 16,
            mca_size: config.mca_size,
        };
        let spectra = Array4::<u32>::from_elem((1, 9, 16, config.mca_size), 1);
        let scalers = Array3::<u32>::from_shape_fn((1, 9, 4), |(_, _, c)| match c {
            3 => 1000000,
            1 => 0,
            _ => 100,
        });
        let decoded = decode(
            &crate::decoder::encode_scalers(&scalers),
            Some(&crate::decoder::encode_spectra(&spectra)),
            &shape,
        )
        .unwrap();
        let window = FrameWindow { start: 0, end: 0 };
        let records = assemble_window(&window, &decoded, &config).unwrap();
        let record = &records[0];
        // grades 8..=15 over two bins, factor 1
        assert_eq!(record.elements[0].value, 16.0);
        assert_eq!(record.grade_sums, None);
        let spectrum = record.regions[0].spectrum.as_ref().unwrap();
        assert_eq!(spectrum.shape(), &[16, 4096]);
        assert_eq!(spectrum[[15, 11]], 1.0);
    }

    #[test]
    fn test_plottable_controls() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        let scalers = scalers_for(9, &vec![[10000, 50, 8000, 1000000]; 9]);
        let record = assemble(0, scalers.view(), None, &config(&registry)).unwrap();
        assert_eq!(record.plottable_values().len(), 10);

        registry
            .set_controls(RuntimeControls {
                only_ff: true,
                include_raw_counters: false,
                always_record_raw_spectra: false,
            })
            .unwrap();
        let record = assemble(0, scalers.view(), None, &config(&registry)).unwrap();
        assert_eq!(
            record.plottable_values(),
            vec![(String::from("FF"), 90000.0)]
        );

        registry
            .set_controls(RuntimeControls {
                only_ff: false,
                include_raw_counters: true,
                always_record_raw_spectra: false,
            })
            .unwrap();
        let record = assemble(0, scalers.view(), None, &config(&registry)).unwrap();
        let values = record.plottable_values();
        assert_eq!(values.len(), 10 + 9 * 5);
        assert!(values.contains(&(String::from("element0_live_clock"), 1000000.0)));
    }

    #[test]
    fn test_window_frame_mismatch() {
        let registry = ElementRegistry::new(DetectorParameters::default());
        let decoded = DecodedWindow {
            scalers: Array3::<u32>::zeros((2, 9, 4)),
            spectra: None,
        };
        let window = FrameWindow { start: 4, end: 6 };
        assert!(matches!(
            assemble_window(&window, &decoded, &config(&registry)),
            Err(AssemblyError::FrameCountMismatch { expected: 3, found: 2 })
        ));
    }
}
