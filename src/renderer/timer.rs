//! Host-supplied frame clock.

use tracing::warn;

/// Tracks the time between rendered frames from timestamps given to [`sync`](Self::sync).
#[derive(Debug, Clone, Default)]
pub struct FrameTimer {
    pending: Option<f64>,
    frame_time: Option<f64>,
    valid: bool,
    warned: bool,
}

/// Clock reading for one frame, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    pub time: Option<f64>,
    pub elapsed: Option<f64>,
}

impl FrameTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the timestamp of the frame about to be rendered.
    pub fn sync(&mut self, time_ms: f64) {
        self.pending = Some(time_ms).filter(|t| t.is_finite());
    }

    /// Forget the previous timestamp; the next frame has no elapsed time.
    pub fn restart(&mut self) {
        self.valid = false;
    }

    /// Consume the synced timestamp for a new frame.
    pub fn tick(&mut self) -> FrameTime {
        let time = self.pending.take();
        if time.is_none() && !self.warned {
            warn!("render called without sync(time); adaptive resolution and tile sizing are disabled");
            self.warned = true;
        }

        let elapsed = match (self.valid, time, self.frame_time) {
            (true, Some(now), Some(last)) => Some(now - last),
            _ => None,
        };
        self.frame_time = time;
        self.valid = true;
        FrameTime { time, elapsed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_between_synced_frames() {
        let mut t = FrameTimer::new();
        t.sync(100.0);
        assert_eq!(t.tick().elapsed, None);
        t.sync(116.0);
        assert_eq!(t.tick(), FrameTime { time: Some(116.0), elapsed: Some(16.0) });
    }

    #[test]
    fn test_unsynced_frame_has_no_time() {
        let mut t = FrameTimer::new();
        t.sync(100.0);
        t.tick();
        assert_eq!(t.tick(), FrameTime::default());
        t.sync(150.0);
        assert_eq!(t.tick().elapsed, None);
    }

    #[test]
    fn test_restart_invalidates_elapsed() {
        let mut t = FrameTimer::new();
        t.sync(0.0);
        t.tick();
        t.restart();
        t.sync(5000.0);
        assert_eq!(t.tick().elapsed, None);
        t.sync(5010.0);
        assert_eq!(t.tick().elapsed, Some(10.0));
    }
}
