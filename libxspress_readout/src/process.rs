use std::fs::File;
use std::io::BufWriter;
use std::sync::mpsc::Sender;

use super::config::Config;
use super::detector::XspressDetector;
use super::error::ProcessorError;
use super::registry::ElementRegistry;
use super::replay::{ReplaySequencer, ReplayTransport};
use super::sink::AsciiSink;
use super::worker_status::{ReadoutPhase, WorkerStatus};

/// The main loop of xspress_readout.
///
/// Replays a recorded acquisition through the full pipeline: the detector is armed and started
/// over the recorded dumps, every window is read, corrected and assembled, and the frames are
/// written to the ascii output. Progress is reported through the sender.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    tx.send(WorkerStatus::new(0.0, 0, worker_id, ReadoutPhase::Loading))?;
    let output_path = config.get_output_file()?;
    let registry = ElementRegistry::new(config.detector.clone());
    // validate before loading anything large
    registry.snapshot()?;

    let transport = ReplayTransport::from_files(
        registry.element_count(),
        config.n_frames,
        &config.scaler_path,
        config.spectrum_path.as_deref(),
    )?;
    spdlog::info!(
        "Total replay size: {}",
        human_bytes::human_bytes(transport.data_size() as f64)
    );
    let sequencer = ReplaySequencer::new(config.n_frames, config.n_frames);
    let detector = XspressDetector::new(
        "xspress",
        registry,
        transport,
        sequencer,
        config.readout_settings(),
    );

    let mut sink = AsciiSink::new(BufWriter::new(File::create(&output_path)?));
    detector.arm()?;
    detector.start()?;

    let total_frames = config.n_frames.max(1);
    let flush_frac: f32 = 0.01;
    let mut progress: f32 = 0.0;
    let mut frames_read: u64 = 0;
    tx.send(WorkerStatus::new(0.0, 0, worker_id, ReadoutPhase::Reading))?;
    while !detector.is_complete()? {
        let count = detector.read_into(&mut sink)? as u64;
        if count == 0 {
            detector.stop()?;
            return Err(ProcessorError::Stalled(frames_read));
        }
        frames_read += count;
        let fraction = frames_read as f32 / total_frames as f32;
        if fraction - progress > flush_frac {
            progress = fraction;
            tx.send(WorkerStatus::new(
                progress,
                frames_read,
                worker_id,
                ReadoutPhase::Reading,
            ))?;
        }
    }
    detector.stop()?;
    sink.flush()?;

    tx.send(WorkerStatus::new(
        1.0,
        frames_read,
        worker_id,
        ReadoutPhase::Finished,
    ))?;
    spdlog::info!(
        "Wrote {} frames to {}",
        frames_read,
        output_path.to_string_lossy()
    );
    Ok(())
}
