use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::constants::{MAX_GRADE_THRESHOLD, MAX_MCA_BITS};
use super::parameters::{DeadtimeModel, ReadoutMode, ResolutionGrade};
use super::window::AcquisitionState;
use super::worker_status::WorkerStatus;

/// Numeric faults local to one element in one frame. These never abort a read; the
/// element value is substituted and the fault is attached to the reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ElementFault {
    #[error("In-window count exceeds total count or a counter is negative")]
    CorruptFrame,
    #[error("Element recorded no total or no in-window counts")]
    ZeroCounts,
    #[error("Measured rate is not finite")]
    RateUndefined,
    #[error("Dead-time correction is not finite; raw value substituted")]
    Uncorrectable,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Transfer word count mismatch -- expected {expected} words, found {found}")]
    WordCountMismatch { expected: usize, found: usize },
    #[error("Byte buffer of length {0} is not a whole number of 32-bit words")]
    PartialWord(usize),
    #[error("Decoded words could not be shaped into frames: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("Resolution grade {1:?} is only valid in ROI mode, not {0:?}")]
    ModeGradeMismatch(ReadoutMode, ResolutionGrade),
    #[error("Region {region} of element {element} has zero width")]
    ZeroWidthRegion { element: usize, region: String },
    #[error("Region {region} of element {element} ends at bin {end}, beyond the spectrum size {size}")]
    RegionOutOfRange {
        element: usize,
        region: String,
        end: usize,
        size: usize,
    },
    #[error("ROI mode requires at least one region for element {0}")]
    MissingRegions(usize),
    #[error("Configuration cannot change while an acquisition is active")]
    AcquisitionActive,
    #[error("No element with index {0} is configured")]
    UnknownElement(usize),
    #[error("Element at position {position} declares index {index}")]
    ElementIndexMismatch { position: usize, index: usize },
    #[error("Element {element} dead-time parameters do not match the selected {expected:?} model")]
    DeadtimeModelMismatch {
        element: usize,
        expected: DeadtimeModel,
    },
    #[error("Expected dead-time parameters for {expected} elements, found {found}")]
    DeadtimeCountMismatch { expected: usize, found: usize },
    #[error("Invalid full spectrum size of {0} bits; must be between 1 and {max}", max=MAX_MCA_BITS)]
    InvalidMcaBits(u32),
    #[error("Invalid grade threshold {0}; must be at most {max}", max=MAX_GRADE_THRESHOLD)]
    InvalidThreshold(u8),
    #[error("Invalid clock period {0}; must be positive and finite")]
    InvalidClockPeriod(f64),
    #[error("Window of element {element} is inverted -- low: {low} high: {high}")]
    WindowInverted {
        element: usize,
        low: usize,
        high: usize,
    },
    #[error("Detector has no elements configured")]
    NoElements,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport read timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Transport rejected the command: {0}")]
    Rejected(String),
    #[error("Transport is disconnected from the detector controller")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Cannot {action} while the acquisition is {from}")]
    InvalidTransition {
        from: AcquisitionState,
        action: &'static str,
    },
    #[error("A read is in flight")]
    ReadInFlight,
    #[error("Detector state lock was poisoned")]
    LockPoisoned,
    #[error("Acquisition failed due to configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Acquisition failed due to transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Decoded window holds {found} frames but the window spans {expected}")]
    FrameCountMismatch { expected: usize, found: usize },
    #[error("Spectra are required in {0:?} mode but none were read")]
    MissingSpectra(ReadoutMode),
    #[error("Decoded spectra have {found} bins; expected {expected}")]
    SpectrumSizeMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink received frame {found} out of order; expected frame {expected}")]
    OutOfOrder { expected: u64, found: u64 },
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ReadoutError {
    #[error("Readout failed due to protocol error: {0}")]
    Protocol(#[from] DecodeError),
    #[error("Readout failed due to transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Readout failed due to acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("Readout failed to assemble frames: {0}")]
    Assembly(#[from] AssemblyError),
    #[error("Readout failed due to sink error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Could not open replay dump because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Replay failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Replay dump could not be decoded: {0}")]
    Decode(#[from] DecodeError),
    #[error("Replay dump holds {found} words, fewer than the {expected} needed for the configured frames")]
    TooFewWords { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Processor failed due to acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("Processor failed due to readout error: {0}")]
    Readout(#[from] ReadoutError),
    #[error("Processor failed due to replay error: {0}")]
    Replay(#[from] ReplayError),
    #[error("Processor failed due to sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Processor stalled after {0} frames with no new frames available")]
    Stalled(u64),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
