//! Offline collaborators which serve a recorded acquisition.
//!
//! Dumps are the raw transport words of consecutive frames written big-endian, one file for
//! the scalers and optionally one for the spectra.
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::constants::{BYTES_PER_WORD, SCALERS_PER_ELEMENT};
use super::decoder::{words_from_be_bytes, words_to_be_bytes};
use super::error::{ReplayError, TransportError};
use super::transport::{ControlCommand, ReadCommand, Sequencer, Transport};

/// Read a big-endian word dump from disk
pub fn read_dump(path: &Path) -> Result<Vec<i32>, ReplayError> {
    if !path.exists() {
        return Err(ReplayError::BadFilePath(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    spdlog::info!(
        "Loaded replay dump {} of size {}",
        path.to_string_lossy(),
        human_bytes::human_bytes(bytes.len() as f64)
    );
    Ok(words_from_be_bytes(&bytes)?)
}

/// Write transport words as a big-endian dump
pub fn write_dump(path: &Path, words: &[i32]) -> Result<(), ReplayError> {
    std::fs::write(path, words_to_be_bytes(words))?;
    Ok(())
}

/// Serves reads from recorded words
#[derive(Debug)]
pub struct ReplayTransport {
    elements: usize,
    scaler_words: Vec<i32>,
    spectrum_words: Option<Vec<i32>>,
    controls: Mutex<Vec<ControlCommand>>,
}

impl ReplayTransport {
    pub fn new(elements: usize, scaler_words: Vec<i32>, spectrum_words: Option<Vec<i32>>) -> Self {
        Self {
            elements,
            scaler_words,
            spectrum_words,
            controls: Mutex::new(Vec::new()),
        }
    }

    /// Load the dumps, checking the scaler dump covers `frames` frames
    pub fn from_files(
        elements: usize,
        frames: u64,
        scaler_path: &Path,
        spectrum_path: Option<&Path>,
    ) -> Result<Self, ReplayError> {
        let scaler_words = read_dump(scaler_path)?;
        let expected = frames as usize * elements * SCALERS_PER_ELEMENT;
        if scaler_words.len() < expected {
            return Err(ReplayError::TooFewWords {
                expected,
                found: scaler_words.len(),
            });
        }
        let spectrum_words = match spectrum_path {
            Some(path) => Some(read_dump(path)?),
            None => None,
        };
        Ok(Self::new(elements, scaler_words, spectrum_words))
    }

    /// Control commands received so far
    pub fn control_history(&self) -> Vec<ControlCommand> {
        match self.controls.lock() {
            Ok(history) => history.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Total size of the recorded data in bytes
    pub fn data_size(&self) -> usize {
        let spectrum_len = self.spectrum_words.as_ref().map_or(0, |w| w.len());
        (self.scaler_words.len() + spectrum_len) * BYTES_PER_WORD
    }

    fn serve(words: &[i32], start: u64, frames: u64, words_per_frame: usize) -> Result<Vec<i32>, TransportError> {
        let begin = start as usize * words_per_frame;
        let end = (start + frames) as usize * words_per_frame;
        match words.get(begin..end) {
            Some(slice) => Ok(slice.to_vec()),
            None => Err(TransportError::Rejected(format!(
                "frames {start} to {} are beyond the recorded data",
                start + frames - 1
            ))),
        }
    }
}

impl Transport for ReplayTransport {
    fn read_words(
        &self,
        command: &ReadCommand,
        _expected_words: usize,
        _timeout: Duration,
    ) -> Result<Vec<i32>, TransportError> {
        match command {
            ReadCommand::Scalers { start, frames } => Self::serve(
                &self.scaler_words,
                *start,
                *frames,
                self.elements * SCALERS_PER_ELEMENT,
            ),
            ReadCommand::Spectra {
                start,
                frames,
                grade_slices,
                mca_size,
            } => match self.spectrum_words.as_ref() {
                Some(words) => Self::serve(
                    words,
                    *start,
                    *frames,
                    self.elements * grade_slices * mca_size,
                ),
                None => Err(TransportError::Rejected(String::from(
                    "no spectra were recorded",
                ))),
            },
        }
    }

    fn control(&self, command: ControlCommand) -> Result<(), TransportError> {
        match self.controls.lock() {
            Ok(mut history) => {
                history.push(command);
                Ok(())
            }
            Err(_) => Err(TransportError::Disconnected),
        }
    }
}

/// A sequencer with a fixed frame count whose produced count is set by hand
#[derive(Debug, Default)]
pub struct ReplaySequencer {
    total_frames: u64,
    produced: AtomicU64,
}

impl ReplaySequencer {
    pub fn new(total_frames: u64, produced: u64) -> Self {
        Self {
            total_frames,
            produced: AtomicU64::new(produced),
        }
    }

    pub fn set_produced(&self, produced: u64) {
        self.produced.store(produced, Ordering::SeqCst);
    }
}

impl Sequencer for ReplaySequencer {
    fn total_frames_configured(&self) -> Result<u64, TransportError> {
        Ok(self.total_frames)
    }

    fn frames_produced(&self) -> Result<u64, TransportError> {
        Ok(self.produced.load(Ordering::SeqCst))
    }

    fn is_armed_but_not_triggered(&self) -> Result<bool, TransportError> {
        Ok(self.total_frames > 0 && self.produced.load(Ordering::SeqCst) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serves_frame_ranges() {
        let scalers: Vec<i32> = (0..24).collect();
        let transport = ReplayTransport::new(2, scalers, None);
        let words = transport
            .read_words(
                &ReadCommand::Scalers {
                    start: 1,
                    frames: 2,
                },
                16,
                Duration::from_millis(10),
            )
            .unwrap();
        assert_eq!(words, (8..24).collect::<Vec<i32>>());
        assert!(matches!(
            transport.read_words(
                &ReadCommand::Scalers {
                    start: 2,
                    frames: 2
                },
                16,
                Duration::from_millis(10)
            ),
            Err(TransportError::Rejected(_))
        ));
        assert!(transport
            .read_words(
                &ReadCommand::Spectra {
                    start: 0,
                    frames: 1,
                    grade_slices: 1,
                    mca_size: 4
                },
                8,
                Duration::from_millis(10)
            )
            .is_err());
    }

    #[test]
    fn test_dump_round_trip() {
        let path = std::env::temp_dir().join("xspress_readout_replay_dump_test.bin");
        let words = vec![1, -1, 70000, i32::MIN];
        write_dump(&path, &words).unwrap();
        assert_eq!(read_dump(&path).unwrap(), words);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
        let transport = ReplayTransport::from_files(1, 1, &path, None).unwrap();
        assert_eq!(transport.data_size(), 16);
        assert!(matches!(
            ReplayTransport::from_files(1, 2, &path, None),
            Err(ReplayError::TooFewWords {
                expected: 8,
                found: 4
            })
        ));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            read_dump(&path),
            Err(ReplayError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_sequencer() {
        let sequencer = ReplaySequencer::new(10, 0);
        assert!(sequencer.is_armed_but_not_triggered().unwrap());
        sequencer.set_produced(3);
        assert!(!sequencer.is_armed_but_not_triggered().unwrap());
        assert_eq!(sequencer.frames_produced().unwrap(), 3);
        assert_eq!(sequencer.total_frames_configured().unwrap(), 10);
    }
}
