/// Stage of a readout reported to a UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadoutPhase {
    #[default]
    Loading,
    Reading,
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub frames_read: u64,
    pub worker_id: usize,
    pub phase: ReadoutPhase,
}

impl WorkerStatus {
    pub fn new(progress: f32, frames_read: u64, worker_id: usize, phase: ReadoutPhase) -> Self {
        Self {
            progress,
            frames_read,
            worker_id,
            phase,
        }
    }
}
