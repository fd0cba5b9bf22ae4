use std::fmt::Display;

use super::error::AcquisitionError;

/// Lifecycle of one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Armed,
    Running,
    Stopped,
    Faulted,
}

impl Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Armed => write!(f, "armed"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Faulted => write!(f, "faulted"),
        }
    }
}

/// Tracks how far into the acquisition the consumer has read.
///
/// A total of zero frames means an unframed, single-shot acquisition which only has frame 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionCursor {
    last_frame_consumed: i64,
    total_frames_expected: u64,
}

impl Default for AcquisitionCursor {
    fn default() -> Self {
        Self::new(0)
    }
}

impl AcquisitionCursor {
    pub fn new(total_frames_expected: u64) -> Self {
        Self {
            last_frame_consumed: -1,
            total_frames_expected,
        }
    }

    pub fn last_frame_consumed(&self) -> i64 {
        self.last_frame_consumed
    }

    pub fn total_frames_expected(&self) -> u64 {
        self.total_frames_expected
    }

    pub fn is_single_shot(&self) -> bool {
        self.total_frames_expected == 0
    }

    /// Index of the first unconsumed frame
    pub fn next_frame(&self) -> u64 {
        (self.last_frame_consumed + 1) as u64
    }

    /// Every expected frame has been consumed
    pub fn is_complete(&self) -> bool {
        let expected = self.total_frames_expected.max(1);
        self.next_frame() >= expected
    }

    fn advance_to(&mut self, frame: u64) {
        self.last_frame_consumed = frame as i64;
    }

    fn reset(&mut self) {
        self.last_frame_consumed = -1;
    }
}

/// An inclusive range of frame indices fetched in one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWindow {
    pub start: u64,
    pub end: u64,
}

impl FrameWindow {
    pub fn frame_count(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn frames(&self) -> std::ops::RangeInclusive<u64> {
        self.start..=self.end
    }
}

/// State machine for the acquisition lifecycle and the frame windows fetched during it.
///
/// The controller never talks to hardware. Callers pass in the sequencer's produced-frame
/// count; the controller decides what to fetch next and only moves its cursor when told a
/// window was fully decoded and corrected.
#[derive(Debug, Clone, Default)]
pub struct WindowController {
    state: AcquisitionState,
    cursor: AcquisitionCursor,
    pending: Option<FrameWindow>,
}

impl WindowController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn cursor(&self) -> &AcquisitionCursor {
        &self.cursor
    }

    /// Armed or running; configuration is frozen
    pub fn is_active(&self) -> bool {
        matches!(self.state, AcquisitionState::Armed | AcquisitionState::Running)
    }

    fn transition_error(&self, action: &'static str) -> AcquisitionError {
        AcquisitionError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// Reset the cursor for a new acquisition. Allowed from every state but running.
    pub fn arm(&mut self, total_frames_expected: u64) -> Result<(), AcquisitionError> {
        if self.state == AcquisitionState::Running {
            return Err(self.transition_error("arm"));
        }
        self.state = AcquisitionState::Armed;
        self.cursor = AcquisitionCursor::new(total_frames_expected);
        self.pending = None;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.state != AcquisitionState::Armed {
            return Err(self.transition_error("start"));
        }
        self.state = AcquisitionState::Running;
        Ok(())
    }

    /// Stop an armed or running acquisition; stopping twice is harmless
    pub fn stop(&mut self) -> Result<(), AcquisitionError> {
        match self.state {
            AcquisitionState::Armed | AcquisitionState::Running => {
                self.state = AcquisitionState::Stopped;
                self.cursor.reset();
                self.pending = None;
                Ok(())
            }
            AcquisitionState::Stopped => Ok(()),
            _ => Err(self.transition_error("stop")),
        }
    }

    /// Transport failure; the caller must re-arm
    pub fn fault(&mut self) {
        self.state = AcquisitionState::Faulted;
        self.cursor.reset();
        self.pending = None;
    }

    /// Frames produced by the hardware, capped at the expected total. A single-shot
    /// acquisition has at most frame 0.
    fn produced(&self, frames_produced: u64) -> u64 {
        if self.cursor.is_single_shot() {
            frames_produced.min(1)
        } else {
            frames_produced.min(self.cursor.total_frames_expected())
        }
    }

    /// Produced but unconsumed frames. Zero unless running and triggered.
    pub fn frames_available(&self, frames_produced: u64, armed_but_not_triggered: bool) -> u64 {
        if self.state != AcquisitionState::Running || armed_but_not_triggered {
            return 0;
        }
        self.produced(frames_produced)
            .saturating_sub(self.cursor.next_frame())
    }

    /// The next window to fetch, or None when nothing new is available.
    ///
    /// The window starts at the first unconsumed frame and holds as many produced frames as fit
    /// in `max_words_per_transfer`; at least one frame even if it alone exceeds the ceiling. A
    /// window that has not been committed is handed out again unchanged.
    pub fn next_window(
        &mut self,
        frames_produced: u64,
        armed_but_not_triggered: bool,
        words_per_frame: usize,
        max_words_per_transfer: usize,
    ) -> Option<FrameWindow> {
        if let Some(pending) = self.pending {
            return Some(pending);
        }
        let available = self.frames_available(frames_produced, armed_but_not_triggered);
        if available == 0 {
            return None;
        }
        let start = self.cursor.next_frame();
        let max_frames = (max_words_per_transfer / words_per_frame.max(1)).max(1) as u64;
        let end = start + available.min(max_frames) - 1;
        let window = FrameWindow { start, end };
        self.pending = Some(window);
        Some(window)
    }

    /// Mark a window fully consumed
    pub fn commit(&mut self, window: &FrameWindow) {
        if self.pending.as_ref() == Some(window) {
            self.pending = None;
        }
        self.cursor.advance_to(window.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(total: u64) -> WindowController {
        let mut controller = WindowController::new();
        controller.arm(total).unwrap();
        controller.start().unwrap();
        controller
    }

    #[test]
    fn test_lifecycle() {
        let mut controller = WindowController::new();
        assert_eq!(controller.state(), AcquisitionState::Idle);
        assert!(controller.start().is_err());
        assert!(controller.stop().is_err());
        controller.arm(10).unwrap();
        assert!(controller.is_active());
        controller.start().unwrap();
        assert!(matches!(
            controller.arm(10),
            Err(AcquisitionError::InvalidTransition {
                from: AcquisitionState::Running,
                ..
            })
        ));
        controller.stop().unwrap();
        assert_eq!(controller.state(), AcquisitionState::Stopped);
        assert_eq!(controller.cursor().last_frame_consumed(), -1);
        controller.stop().unwrap();
        controller.arm(10).unwrap();
        controller.fault();
        assert_eq!(controller.state(), AcquisitionState::Faulted);
        assert!(controller.start().is_err());
        controller.arm(5).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Armed);
    }

    #[test]
    fn test_frames_available() {
        let mut controller = WindowController::new();
        controller.arm(10).unwrap();
        assert_eq!(controller.frames_available(4, false), 0);
        controller.start().unwrap();
        assert_eq!(controller.frames_available(4, true), 0);
        assert_eq!(controller.frames_available(4, false), 4);
        // produced beyond the expected total is ignored
        assert_eq!(controller.frames_available(12, false), 10);
        let window = controller.next_window(4, false, 36, 1000).unwrap();
        controller.commit(&window);
        assert_eq!(controller.frames_available(4, false), 0);
        assert_eq!(controller.frames_available(6, false), 2);
    }

    #[test]
    fn test_window_ceiling() {
        for words_per_frame in [1usize, 7, 36, 4096, 36864] {
            for max_words in [1usize, 100, 4096, 100000, 1000000] {
                for produced in 1..20u64 {
                    let mut controller = running(100);
                    let window = controller
                        .next_window(produced, false, words_per_frame, max_words)
                        .unwrap();
                    assert_eq!(window.start, 0);
                    assert!(window.end >= window.start);
                    assert!(window.end < produced);
                    if window.frame_count() > 1 {
                        assert!(window.frame_count() * words_per_frame <= max_words);
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_frame_over_ceiling() {
        let mut controller = running(100);
        let window = controller.next_window(10, false, 5000, 1000).unwrap();
        assert_eq!(window, FrameWindow { start: 0, end: 0 });
    }

    #[test]
    fn test_windows_advance() {
        let mut controller = running(10);
        let first = controller.next_window(10, false, 4, 16).unwrap();
        assert_eq!(first, FrameWindow { start: 0, end: 3 });
        controller.commit(&first);
        let second = controller.next_window(10, false, 4, 16).unwrap();
        assert_eq!(second, FrameWindow { start: 4, end: 7 });
        controller.commit(&second);
        let third = controller.next_window(10, false, 4, 16).unwrap();
        assert_eq!(third, FrameWindow { start: 8, end: 9 });
        controller.commit(&third);
        assert!(controller.cursor().is_complete());
        assert_eq!(controller.next_window(10, false, 4, 16), None);
    }

    #[test]
    fn test_uncommitted_window_reissued() {
        let mut controller = running(10);
        let first = controller.next_window(3, false, 4, 16).unwrap();
        // more frames arrive but the failed window comes back unchanged
        let again = controller.next_window(10, false, 4, 16).unwrap();
        assert_eq!(first, again);
        assert_eq!(controller.cursor().last_frame_consumed(), -1);
    }

    #[test]
    fn test_single_shot() {
        let mut controller = running(0);
        // still counting
        assert_eq!(controller.frames_available(0, false), 0);
        assert_eq!(controller.next_window(0, false, 36, 1000), None);
        assert_eq!(controller.frames_available(3, false), 1);
        let window = controller.next_window(1, false, 36, 1000).unwrap();
        assert_eq!(window, FrameWindow { start: 0, end: 0 });
        controller.commit(&window);
        assert!(controller.cursor().is_complete());
        assert_eq!(controller.next_window(1, false, 36, 1000), None);
    }
}
