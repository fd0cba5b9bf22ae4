use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::assembler::{assemble_window, FrameRecord};
use super::constants::{BYTES_PER_WORD, DEFAULT_MAX_WORDS_PER_TRANSFER, DEFAULT_READ_TIMEOUT_MS};
use super::deadtime::{live_stats, LiveStats, RawScalers};
use super::decoder::{decode, DecodedWindow, FrameShape};
use super::error::{AcquisitionError, ConfigurationError, ReadoutError, TransportError};
use super::parameters::DetectorParameters;
use super::registry::{AcquisitionConfig, ElementRegistry};
use super::sink::FrameSink;
use super::transport::{ControlCommand, ReadCommand, Sequencer, Transport};
use super::window::{AcquisitionState, FrameWindow, WindowController};

/// Limits applied to every transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadoutSettings {
    pub max_words_per_transfer: usize,
    pub read_timeout: Duration,
}

impl Default for ReadoutSettings {
    fn default() -> Self {
        Self {
            max_words_per_transfer: DEFAULT_MAX_WORDS_PER_TRANSFER,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
        }
    }
}

/// Mutable state of one detector, guarded by a single mutex
#[derive(Debug)]
struct DetectorState {
    registry: ElementRegistry,
    controller: WindowController,
    config: Option<Arc<AcquisitionConfig>>,
    /// Bumped on every arm and stop so reads started before can tell they are stale
    generation: u64,
    read_in_flight: bool,
}

/// What a read captured under the lock before releasing it
struct ReadTicket {
    window: FrameWindow,
    config: Arc<AcquisitionConfig>,
    generation: u64,
}

/// Clears the in-flight flag when a read ends, including by unwinding
struct InFlightGuard<'a> {
    state: &'a Mutex<DetectorState>,
    armed: bool,
}

impl InFlightGuard<'_> {
    /// The flag was cleared under the lock by the reader itself
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.read_in_flight = false;
    }
}

/// A multi-element detector read through a transport and paced by a timing sequencer.
///
/// All methods take `&self` so a detector can be shared between a readout thread and an
/// operator thread. The state mutex is never held across a transport read, which lets
/// [stop](XspressDetector::stop) cancel an acquisition while a read is in flight.
#[derive(Debug)]
pub struct XspressDetector<T: Transport, S: Sequencer> {
    name: String,
    transport: T,
    sequencer: S,
    settings: ReadoutSettings,
    state: Mutex<DetectorState>,
}

impl<T: Transport, S: Sequencer> XspressDetector<T, S> {
    pub fn new(
        name: &str,
        registry: ElementRegistry,
        transport: T,
        sequencer: S,
        settings: ReadoutSettings,
    ) -> Self {
        Self {
            name: name.to_string(),
            transport,
            sequencer,
            settings,
            state: Mutex::new(DetectorState {
                registry,
                controller: WindowController::new(),
                config: None,
                generation: 0,
                read_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sequencer(&self) -> &S {
        &self.sequencer
    }

    fn lock(&self) -> Result<MutexGuard<'_, DetectorState>, AcquisitionError> {
        self.state.lock().map_err(|_| AcquisitionError::LockPoisoned)
    }

    pub fn state(&self) -> Result<AcquisitionState, AcquisitionError> {
        Ok(self.lock()?.controller.state())
    }

    /// Index of the last frame handed out, -1 when none
    pub fn last_frame_consumed(&self) -> Result<i64, AcquisitionError> {
        Ok(self.lock()?.controller.cursor().last_frame_consumed())
    }

    /// Whether every expected frame of the current acquisition has been read
    pub fn is_complete(&self) -> Result<bool, AcquisitionError> {
        Ok(self.lock()?.controller.cursor().is_complete())
    }

    /// Change the configuration. Rejected while an acquisition is armed or running.
    pub fn configure<R>(
        &self,
        change: impl FnOnce(&mut ElementRegistry) -> Result<R, ConfigurationError>,
    ) -> Result<R, AcquisitionError> {
        let mut state = self.lock()?;
        Ok(change(&mut state.registry)?)
    }

    /// Export the current configuration
    pub fn parameters(&self) -> Result<DetectorParameters, AcquisitionError> {
        Ok(self.lock()?.registry.parameters().clone())
    }

    /// The configuration captured at the last arm
    pub fn acquisition_config(&self) -> Result<Option<Arc<AcquisitionConfig>>, AcquisitionError> {
        Ok(self.lock()?.config.clone())
    }

    /// Clear the detector memory and prepare a new acquisition
    pub fn arm(&self) -> Result<(), AcquisitionError> {
        let total_frames = self.sequencer.total_frames_configured()?;
        let mut state = self.lock()?;
        if state.read_in_flight {
            return Err(AcquisitionError::ReadInFlight);
        }
        if state.controller.state() == AcquisitionState::Running {
            return Err(AcquisitionError::InvalidTransition {
                from: AcquisitionState::Running,
                action: "arm",
            });
        }
        let config = state.registry.snapshot()?;
        self.transport.control(ControlCommand::Clear)?;
        state.controller.arm(total_frames)?;
        state.registry.set_acquisition_active(true);
        state.generation += 1;
        spdlog::info!(
            "{} armed at {} -- {} elements, {:?} mode, {:?} grade, {} frames expected",
            self.name,
            time::OffsetDateTime::now_utc(),
            config.element_count(),
            config.mode,
            config.grade,
            total_frames
        );
        state.config = Some(config);
        Ok(())
    }

    /// Enable counting. The external sequencer is driven elsewhere.
    pub fn start(&self) -> Result<(), AcquisitionError> {
        let mut state = self.lock()?;
        if state.controller.state() != AcquisitionState::Armed {
            return Err(AcquisitionError::InvalidTransition {
                from: state.controller.state(),
                action: "start",
            });
        }
        self.transport.control(ControlCommand::Enable)?;
        state.controller.start()?;
        spdlog::info!("{} started", self.name);
        Ok(())
    }

    /// Stop the acquisition. Safe to call while another thread is reading; that read's
    /// result is discarded.
    pub fn stop(&self) -> Result<(), AcquisitionError> {
        let mut state = self.lock()?;
        state.controller.stop()?;
        state.registry.set_acquisition_active(false);
        state.generation += 1;
        spdlog::info!("{} stopped", self.name);
        self.transport.control(ControlCommand::Disable)?;
        Ok(())
    }

    /// Frames produced by the sequencer and not yet read
    pub fn frames_available(&self) -> Result<u64, AcquisitionError> {
        let (produced, waiting) = self.sequencer_progress()?;
        Ok(self.lock()?.controller.frames_available(produced, waiting))
    }

    /// Live statistics of every element, given one frame of raw scalers per element
    pub fn live_stats(&self, raw: &[RawScalers]) -> Result<Vec<LiveStats>, AcquisitionError> {
        let state = self.lock()?;
        let params = state.registry.parameters();
        Ok(params
            .elements
            .iter()
            .zip(raw.iter())
            .map(|(element, scalers)| {
                if element.excluded {
                    LiveStats::default()
                } else {
                    live_stats(
                        scalers,
                        &element.deadtime,
                        params.clock_period,
                        params.deadtime_energy,
                    )
                }
            })
            .collect())
    }

    /// Frames produced and whether the sequencer still waits for its trigger. A sequencer
    /// failure faults a running acquisition like a failed read does.
    fn sequencer_progress(&self) -> Result<(u64, bool), TransportError> {
        let progress = self
            .sequencer
            .frames_produced()
            .and_then(|produced| Ok((produced, self.sequencer.is_armed_but_not_triggered()?)));
        if let Err(e) = &progress {
            let mut state = self.lock().map_err(|_| TransportError::Disconnected)?;
            if state.controller.state() == AcquisitionState::Running {
                state.controller.fault();
                state.registry.set_acquisition_active(false);
                state.generation += 1;
                spdlog::error!("{} faulted querying the sequencer: {e}", self.name);
            }
        }
        progress
    }

    /// Claim the next window under the lock
    fn begin_read(&self) -> Result<Option<ReadTicket>, ReadoutError> {
        let (produced, waiting) = self.sequencer_progress()?;
        let mut state = self.lock()?;
        if state.read_in_flight {
            return Err(AcquisitionError::ReadInFlight.into());
        }
        if state.controller.state() != AcquisitionState::Running {
            return Err(AcquisitionError::InvalidTransition {
                from: state.controller.state(),
                action: "read",
            }
            .into());
        }
        let config = match state.config.clone() {
            Some(c) => c,
            None => return Ok(None),
        };
        let window = match state.controller.next_window(
            produced,
            waiting,
            config.words_per_frame(),
            self.settings.max_words_per_transfer,
        ) {
            Some(w) => w,
            None => return Ok(None),
        };
        state.read_in_flight = true;
        Ok(Some(ReadTicket {
            window,
            config,
            generation: state.generation,
        }))
    }

    /// Fetch and decode the words of one window. Runs without the lock.
    fn fetch(&self, ticket: &ReadTicket) -> Result<DecodedWindow, ReadoutError> {
        let config = &ticket.config;
        let shape = FrameShape {
            frames: ticket.window.frame_count(),
            elements: config.element_count(),
            grade_slices: config.grade_slices(),
            mca_size: config.mca_size,
        };
        let scaler_command = ReadCommand::Scalers {
            start: ticket.window.start,
            frames: shape.frames as u64,
        };
        let scaler_words = self.transport.read_words(
            &scaler_command,
            shape.scaler_words(),
            self.settings.read_timeout,
        )?;
        let spectrum_words = if config.reads_spectra() {
            let command = ReadCommand::Spectra {
                start: ticket.window.start,
                frames: shape.frames as u64,
                grade_slices: shape.grade_slices,
                mca_size: shape.mca_size,
            };
            Some(self.transport.read_words(
                &command,
                shape.spectrum_words(),
                self.settings.read_timeout,
            )?)
        } else {
            None
        };
        spdlog::debug!(
            "{} read frames {}..={} ({})",
            self.name,
            ticket.window.start,
            ticket.window.end,
            human_bytes::human_bytes(
                ((scaler_words.len() + spectrum_words.as_ref().map_or(0, |w| w.len()))
                    * BYTES_PER_WORD) as f64
            )
        );
        Ok(decode(&scaler_words, spectrum_words.as_deref(), &shape)?)
    }

    /// Read the next available window and return its frames in order.
    ///
    /// Returns an empty list when nothing new is available, or when the acquisition was stopped
    /// while the read was in flight. A transport failure faults the acquisition. A protocol
    /// failure leaves the cursor where it was so the same window is fetched again on the next
    /// call.
    pub fn read_next_window(&self) -> Result<Vec<FrameRecord>, ReadoutError> {
        let ticket = match self.begin_read()? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };
        let mut in_flight = InFlightGuard {
            state: &self.state,
            armed: true,
        };

        let outcome = self.fetch(&ticket).and_then(|decoded| {
            Ok(assemble_window(&ticket.window, &decoded, &ticket.config)?)
        });

        let mut state = self.lock()?;
        state.read_in_flight = false;
        in_flight.disarm();
        if state.generation != ticket.generation {
            spdlog::info!(
                "{} discarded frames {}..={} read across a stop",
                self.name,
                ticket.window.start,
                ticket.window.end
            );
            return Ok(Vec::new());
        }
        match outcome {
            Ok(records) => {
                state.controller.commit(&ticket.window);
                for record in records.iter() {
                    for (element, fault) in record.faults() {
                        spdlog::warn!("{} frame {} element {element}: {fault}", self.name, record.frame);
                    }
                }
                Ok(records)
            }
            Err(ReadoutError::Transport(e)) => {
                state.controller.fault();
                state.registry.set_acquisition_active(false);
                spdlog::error!("{} faulted reading frames {}..={}: {e}", self.name, ticket.window.start, ticket.window.end);
                Err(ReadoutError::Transport(e))
            }
            Err(e) => {
                spdlog::error!("{} failed reading frames {}..={}: {e}", self.name, ticket.window.start, ticket.window.end);
                Err(e)
            }
        }
    }

    /// Read the next window straight into a sink; returns the number of frames written
    pub fn read_into(&self, sink: &mut impl FrameSink) -> Result<usize, ReadoutError> {
        let records = self.read_next_window()?;
        let count = records.len();
        for record in records {
            sink.accept(record)?;
        }
        Ok(count)
    }
}
