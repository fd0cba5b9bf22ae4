//! Contracts of the external collaborators driving the readout.
//!
//! The pipeline only depends on these traits, never on the controller's command grammar or on
//! how the timing sequencer is programmed.
use std::time::Duration;

use super::error::TransportError;

/// A request for a contiguous range of frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCommand {
    /// Four scaler words per element per frame
    Scalers { start: u64, frames: u64 },
    /// `grade_slices * mca_size` words per element per frame
    Spectra {
        start: u64,
        frames: u64,
        grade_slices: usize,
        mca_size: usize,
    },
}

/// Lifecycle commands sent to the detector controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Clear the on-detector memory
    Clear,
    /// Enable counting
    Enable,
    /// Disable counting
    Disable,
}

/// Synchronous access to the detector controller.
///
/// Reads may block for a full round trip and must give up with [TransportError::Timeout] once
/// `timeout` elapses. Retries, if any, belong to the implementation.
pub trait Transport: Send + Sync {
    fn read_words(
        &self,
        command: &ReadCommand,
        expected_words: usize,
        timeout: Duration,
    ) -> Result<Vec<i32>, TransportError>;

    fn control(&self, command: ControlCommand) -> Result<(), TransportError>;
}

/// The external timing sequencer which drives frame boundaries
pub trait Sequencer: Send + Sync {
    /// Frames programmed for the acquisition; zero means unframed
    fn total_frames_configured(&self) -> Result<u64, TransportError>;

    /// Frames completed so far
    fn frames_produced(&self) -> Result<u64, TransportError>;

    /// Armed but waiting for its first trigger
    fn is_armed_but_not_triggered(&self) -> Result<bool, TransportError>;
}
