use std::time::{Duration, Instant};

/// Result of a completed measurement window.
#[derive(Debug, Clone, Copy)]
pub struct FrameTiming {
    pub fps: f32,
    pub average_ms: f32,
    pub worst_ms: f32,
}

/// Frame-rate and frame-time measurement for the title-bar stats line.
///
/// Statistics update once per second; between updates the previous
/// window's values stay readable.
pub struct FpsCounter {
    last_update: Instant,
    frame_count: u32,
    accumulated_time: Duration,
    worst_frame: Duration,
    pub current: FrameTiming,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
            accumulated_time: Duration::ZERO,
            worst_frame: Duration::ZERO,
            current: FrameTiming {
                fps: 0.0,
                average_ms: 0.0,
                worst_ms: 0.0,
            },
        }
    }

    /// Counts one frame; returns the window statistics once per second.
    pub fn update(&mut self) -> Option<FrameTiming> {
        self.frame_count += 1;
        let now = Instant::now();
        let delta = now - self.last_update;
        self.last_update = now;
        self.accumulated_time += delta;
        self.worst_frame = self.worst_frame.max(delta);

        if self.accumulated_time.as_secs_f32() < 1.0 {
            return None;
        }

        let seconds = self.accumulated_time.as_secs_f32();
        self.current = FrameTiming {
            fps: self.frame_count as f32 / seconds,
            average_ms: seconds * 1000.0 / self.frame_count as f32,
            worst_ms: self.worst_frame.as_secs_f32() * 1000.0,
        };

        self.accumulated_time = Duration::ZERO;
        self.worst_frame = Duration::ZERO;
        self.frame_count = 0;
        Some(self.current)
    }
}
