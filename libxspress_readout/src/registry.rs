use std::sync::Arc;

use bit_set::BitSet;

use super::constants::{MAX_GRADE_THRESHOLD, MAX_MCA_BITS, SCALERS_PER_ELEMENT};
use super::error::ConfigurationError;
use super::parameters::{
    DeadtimeModel, DeadtimeParams, DetectorElementConfig, DetectorParameters, ReadoutMode, Region,
    RegionType, ResolutionGrade, RuntimeControls,
};

/// Immutable view of the configuration captured when an acquisition is armed.
///
/// Every stage of the pipeline reads its settings from here, so a configuration change made
/// after arming can never leak into a running acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    pub elements: Vec<DetectorElementConfig>,
    pub excluded: BitSet,
    pub mode: ReadoutMode,
    pub grade: ResolutionGrade,
    pub region_type: RegionType,
    pub deadtime_model: DeadtimeModel,
    pub save_raw_spectrum: bool,
    pub sum_all_elements: bool,
    /// Bins in an uncompressed spectrum
    pub full_mca_size: usize,
    /// Bins per grade slice actually transferred; the ROI-packed size in ROI mode
    pub mca_size: usize,
    pub clock_period: f64,
    pub deadtime_energy: f64,
    pub controls: RuntimeControls,
}

impl AcquisitionConfig {
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn grade_slices(&self) -> usize {
        self.grade.slice_count()
    }

    pub fn is_excluded(&self, element: usize) -> bool {
        self.excluded.contains(element)
    }

    /// Indices of the elements that contribute to the cross-element sum
    pub fn active_elements(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.element_count()).filter(|idx| !self.is_excluded(*idx))
    }

    /// Spectra are transferred in every mode but scalers-only, unless raw spectra are always kept
    pub fn reads_spectra(&self) -> bool {
        self.mode != ReadoutMode::ScalersOnly || self.controls.always_record_raw_spectra
    }

    pub fn scaler_words_per_frame(&self) -> usize {
        self.element_count() * SCALERS_PER_ELEMENT
    }

    pub fn spectrum_words_per_frame(&self) -> usize {
        self.element_count() * self.grade_slices() * self.mca_size
    }

    /// Words of the largest single transfer needed per frame
    pub fn words_per_frame(&self) -> usize {
        if self.reads_spectra() {
            self.spectrum_words_per_frame()
        } else {
            self.scaler_words_per_frame()
        }
    }
}

/// Number of packed bins an element needs in ROI mode: its regions plus the out-of-window bin
fn roi_channels(regions: &[Region], region_type: RegionType) -> usize {
    1 + regions
        .iter()
        .map(|r| match region_type {
            RegionType::VirtualScaler => 1,
            RegionType::PartialSpectrum => r.width(),
        })
        .sum::<usize>()
}

/// Smallest power of two strictly greater than the channel count
fn roi_mca_size(channels: usize) -> usize {
    let mut order = 0;
    while (1usize << order) <= channels {
        order += 1;
    }
    1 << order
}

/// Owner of the detector element configuration and the global mode/grade settings.
///
/// Setters validate what they can immediately and are rejected while an acquisition is
/// active. Cross-field rules (regions present in ROI mode, region bounds) are checked when
/// a snapshot is taken.
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    params: DetectorParameters,
    acquisition_active: bool,
}

impl ElementRegistry {
    pub fn new(params: DetectorParameters) -> Self {
        Self {
            params,
            acquisition_active: false,
        }
    }

    /// Export the current configuration
    pub fn parameters(&self) -> &DetectorParameters {
        &self.params
    }

    pub fn element(&self, index: usize) -> Option<&DetectorElementConfig> {
        self.params.elements.get(index)
    }

    pub fn element_count(&self) -> usize {
        self.params.elements.len()
    }

    pub fn is_acquisition_active(&self) -> bool {
        self.acquisition_active
    }

    pub(crate) fn set_acquisition_active(&mut self, active: bool) {
        self.acquisition_active = active;
    }

    fn check_inactive(&self) -> Result<(), ConfigurationError> {
        if self.acquisition_active {
            Err(ConfigurationError::AcquisitionActive)
        } else {
            Ok(())
        }
    }

    fn element_mut(&mut self, index: usize) -> Result<&mut DetectorElementConfig, ConfigurationError> {
        self.params
            .elements
            .get_mut(index)
            .ok_or(ConfigurationError::UnknownElement(index))
    }

    /// Replace the whole configuration
    pub fn import(&mut self, params: DetectorParameters) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        validate(&params)?;
        self.params = params;
        Ok(())
    }

    /// Set mode and grade together; a grade other than None requires ROI mode
    pub fn set_readout(
        &mut self,
        mode: ReadoutMode,
        grade: ResolutionGrade,
    ) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        check_mode_grade(mode, grade)?;
        self.params.mode = mode;
        self.params.grade = grade;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ReadoutMode) -> Result<(), ConfigurationError> {
        self.set_readout(mode, self.params.grade)
    }

    pub fn set_grade(&mut self, grade: ResolutionGrade) -> Result<(), ConfigurationError> {
        self.set_readout(self.params.mode, grade)
    }

    pub fn set_region_type(&mut self, region_type: RegionType) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.params.region_type = region_type;
        Ok(())
    }

    pub fn set_regions(
        &mut self,
        element: usize,
        regions: Vec<Region>,
    ) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        check_region_widths(element, &regions)?;
        self.element_mut(element)?.regions = regions;
        Ok(())
    }

    pub fn set_excluded(&mut self, element: usize, excluded: bool) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.element_mut(element)?.excluded = excluded;
        Ok(())
    }

    pub fn set_window(
        &mut self,
        element: usize,
        low: usize,
        high: usize,
    ) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        if low > high {
            return Err(ConfigurationError::WindowInverted { element, low, high });
        }
        let config = self.element_mut(element)?;
        config.window_low = low;
        config.window_high = high;
        Ok(())
    }

    /// Set the coefficients of one element; they must match the selected model
    pub fn set_deadtime_params(
        &mut self,
        element: usize,
        params: DeadtimeParams,
    ) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        let expected = self.params.deadtime_model;
        if params.model() != expected {
            return Err(ConfigurationError::DeadtimeModelMismatch { element, expected });
        }
        self.element_mut(element)?.deadtime = params;
        Ok(())
    }

    /// Switch the dead-time model, supplying new coefficients for every element at once
    pub fn switch_deadtime_model(
        &mut self,
        model: DeadtimeModel,
        params: Vec<DeadtimeParams>,
    ) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        if params.len() != self.params.elements.len() {
            return Err(ConfigurationError::DeadtimeCountMismatch {
                expected: self.params.elements.len(),
                found: params.len(),
            });
        }
        if let Some(element) = params.iter().position(|p| p.model() != model) {
            return Err(ConfigurationError::DeadtimeModelMismatch {
                element,
                expected: model,
            });
        }
        self.params.deadtime_model = model;
        for (config, p) in self.params.elements.iter_mut().zip(params) {
            config.deadtime = p;
        }
        Ok(())
    }

    pub fn set_deadtime_energy(&mut self, energy: f64) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.params.deadtime_energy = energy;
        Ok(())
    }

    pub fn set_full_mca_bits(&mut self, bits: u32) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        if bits == 0 || bits > MAX_MCA_BITS {
            return Err(ConfigurationError::InvalidMcaBits(bits));
        }
        self.params.full_mca_bits = bits;
        Ok(())
    }

    pub fn set_save_raw_spectrum(&mut self, save_raw: bool) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.params.save_raw_spectrum = save_raw;
        Ok(())
    }

    pub fn set_sum_all_elements(&mut self, sum_all: bool) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.params.sum_all_elements = sum_all;
        Ok(())
    }

    pub fn set_controls(&mut self, controls: RuntimeControls) -> Result<(), ConfigurationError> {
        self.check_inactive()?;
        self.params.controls = controls;
        Ok(())
    }

    /// Validate the configuration and capture it for an acquisition
    pub fn snapshot(&self) -> Result<Arc<AcquisitionConfig>, ConfigurationError> {
        validate(&self.params)?;
        let params = &self.params;
        let full_mca_size = 1usize << params.full_mca_bits;

        let mut excluded = BitSet::with_capacity(params.elements.len());
        for element in params.elements.iter().filter(|e| e.excluded) {
            excluded.insert(element.index);
        }

        let mca_size = match params.mode {
            ReadoutMode::Roi => roi_mca_size(
                params
                    .elements
                    .iter()
                    .map(|e| roi_channels(&e.regions, params.region_type))
                    .max()
                    .unwrap_or(1),
            ),
            _ => full_mca_size,
        };

        Ok(Arc::new(AcquisitionConfig {
            elements: params.elements.clone(),
            excluded,
            mode: params.mode,
            grade: params.grade,
            region_type: params.region_type,
            deadtime_model: params.deadtime_model,
            save_raw_spectrum: params.save_raw_spectrum,
            sum_all_elements: params.sum_all_elements,
            full_mca_size,
            mca_size,
            clock_period: params.clock_period,
            deadtime_energy: params.deadtime_energy,
            controls: params.controls,
        }))
    }
}

fn check_mode_grade(mode: ReadoutMode, grade: ResolutionGrade) -> Result<(), ConfigurationError> {
    if let ResolutionGrade::Threshold(threshold) = grade {
        if threshold > MAX_GRADE_THRESHOLD {
            return Err(ConfigurationError::InvalidThreshold(threshold));
        }
    }
    if grade != ResolutionGrade::None && mode != ReadoutMode::Roi {
        return Err(ConfigurationError::ModeGradeMismatch(mode, grade));
    }
    Ok(())
}

fn check_region_widths(element: usize, regions: &[Region]) -> Result<(), ConfigurationError> {
    match regions.iter().find(|r| r.width() == 0) {
        Some(r) => Err(ConfigurationError::ZeroWidthRegion {
            element,
            region: r.name.clone(),
        }),
        None => Ok(()),
    }
}

/// Full validation of a configuration
fn validate(params: &DetectorParameters) -> Result<(), ConfigurationError> {
    if params.elements.is_empty() {
        return Err(ConfigurationError::NoElements);
    }
    if params.full_mca_bits == 0 || params.full_mca_bits > MAX_MCA_BITS {
        return Err(ConfigurationError::InvalidMcaBits(params.full_mca_bits));
    }
    if !params.clock_period.is_finite() || params.clock_period <= 0.0 {
        return Err(ConfigurationError::InvalidClockPeriod(params.clock_period));
    }
    check_mode_grade(params.mode, params.grade)?;

    let full_mca_size = 1usize << params.full_mca_bits;
    for (position, element) in params.elements.iter().enumerate() {
        if element.index != position {
            return Err(ConfigurationError::ElementIndexMismatch {
                position,
                index: element.index,
            });
        }
        if element.window_low > element.window_high {
            return Err(ConfigurationError::WindowInverted {
                element: position,
                low: element.window_low,
                high: element.window_high,
            });
        }
        if element.deadtime.model() != params.deadtime_model {
            return Err(ConfigurationError::DeadtimeModelMismatch {
                element: position,
                expected: params.deadtime_model,
            });
        }
        check_region_widths(position, &element.regions)?;
        if let Some(r) = element.regions.iter().find(|r| r.end > full_mca_size) {
            return Err(ConfigurationError::RegionOutOfRange {
                element: position,
                region: r.name.clone(),
                end: r.end,
                size: full_mca_size,
            });
        }
        if params.mode == ReadoutMode::Roi && !element.excluded && element.regions.is_empty() {
            return Err(ConfigurationError::MissingRegions(position));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi_registry() -> ElementRegistry {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        for idx in 0..registry.element_count() {
            registry
                .set_regions(idx, vec![Region::new("fe", 600, 700), Region::new("cu", 780, 820)])
                .unwrap();
        }
        registry.set_mode(ReadoutMode::Roi).unwrap();
        registry
    }

    #[test]
    fn test_default_snapshot() {
        let registry = ElementRegistry::new(DetectorParameters::default());
        let config = registry.snapshot().unwrap();
        assert_eq!(config.element_count(), 9);
        assert_eq!(config.mca_size, 4096);
        assert!(!config.reads_spectra());
        assert_eq!(config.words_per_frame(), 36);
    }

    #[test]
    fn test_grade_requires_roi() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        let result = registry.set_grade(ResolutionGrade::Threshold(4));
        assert_eq!(
            result,
            Err(ConfigurationError::ModeGradeMismatch(
                ReadoutMode::ScalersOnly,
                ResolutionGrade::Threshold(4)
            ))
        );
        assert_eq!(registry.parameters().grade, ResolutionGrade::None);
    }

    #[test]
    fn test_zero_width_region_rejected() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        let result = registry.set_regions(2, vec![Region::new("empty", 300, 300)]);
        assert!(matches!(
            result,
            Err(ConfigurationError::ZeroWidthRegion { element: 2, .. })
        ));
        assert!(registry.element(2).unwrap().regions.is_empty());
    }

    #[test]
    fn test_roi_requires_regions() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        registry.set_mode(ReadoutMode::Roi).unwrap();
        assert_eq!(
            registry.snapshot(),
            Err(ConfigurationError::MissingRegions(0))
        );
        // excluded elements need no regions
        let mut registry = roi_registry();
        registry.set_regions(3, Vec::new()).unwrap();
        registry.set_excluded(3, true).unwrap();
        let config = registry.snapshot().unwrap();
        assert!(config.is_excluded(3));
        assert_eq!(config.active_elements().count(), 8);
    }

    #[test]
    fn test_roi_mca_size() {
        let mut registry = roi_registry();
        // two virtual scalers plus the out bin need 3 channels
        assert_eq!(registry.snapshot().unwrap().mca_size, 4);
        registry.set_region_type(RegionType::PartialSpectrum).unwrap();
        // 100 + 40 + 1 channels
        assert_eq!(registry.snapshot().unwrap().mca_size, 256);
        assert_eq!(roi_mca_size(4), 8);
    }

    #[test]
    fn test_rejected_while_active() {
        let mut registry = roi_registry();
        registry.set_acquisition_active(true);
        assert_eq!(
            registry.set_readout(ReadoutMode::FullMca, ResolutionGrade::None),
            Err(ConfigurationError::AcquisitionActive)
        );
        assert_eq!(registry.parameters().mode, ReadoutMode::Roi);
        registry.set_acquisition_active(false);
        assert!(registry
            .set_readout(ReadoutMode::FullMca, ResolutionGrade::None)
            .is_ok());
    }

    #[test]
    fn test_deadtime_model_switch() {
        let mut registry = ElementRegistry::new(DetectorParameters::default());
        let cubic = DeadtimeParams::Cubic {
            process_dead_time_in_window: 3.4e-7,
        };
        assert!(matches!(
            registry.set_deadtime_params(0, cubic),
            Err(ConfigurationError::DeadtimeModelMismatch { element: 0, .. })
        ));
        registry
            .switch_deadtime_model(DeadtimeModel::Cubic, vec![cubic; 9])
            .unwrap();
        assert_eq!(registry.snapshot().unwrap().deadtime_model, DeadtimeModel::Cubic);
    }

    #[test]
    fn test_region_out_of_range() {
        let mut registry = roi_registry();
        registry
            .set_regions(1, vec![Region::new("high", 4000, 4100)])
            .unwrap();
        assert!(matches!(
            registry.snapshot(),
            Err(ConfigurationError::RegionOutOfRange { element: 1, .. })
        ));
    }
}
