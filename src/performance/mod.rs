//! # Step timings
//!
//! Rolling windows of physics and render durations, shown in the control
//! panel. Display only: nothing in the engine reads these back.
//!
//! ```rust
//! use std::time::Duration;
//! use attractor::performance::StepTimings;
//!
//! let mut timings = StepTimings::default();
//! timings.record_physics(Duration::from_millis(4));
//! timings.record_render(Duration::from_millis(2));
//! assert_eq!(timings.average_frame(), Duration::from_millis(6));
//! ```

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per phase, roughly two seconds at 60fps.
pub const DEFAULT_SAMPLES: usize = 120;

#[derive(Debug, Clone)]
struct Window {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl Window {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    fn push(&mut self, sample: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn last(&self) -> Duration {
        self.samples.back().copied().unwrap_or_default()
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or_default()
    }

    fn history_ms(&self) -> Vec<f32> {
        self.samples.iter().map(|d| d.as_secs_f32() * 1000.0).collect()
    }
}

/// Physics and render durations of recent ticks.
#[derive(Debug, Clone)]
pub struct StepTimings {
    physics: Window,
    render: Window,
}

impl Default for StepTimings {
    fn default() -> Self {
        Self::with_samples(DEFAULT_SAMPLES)
    }
}

impl StepTimings {
    pub fn with_samples(max_samples: usize) -> Self {
        Self {
            physics: Window::new(max_samples),
            render: Window::new(max_samples),
        }
    }

    pub fn record_physics(&mut self, elapsed: Duration) {
        self.physics.push(elapsed);
    }

    pub fn record_render(&mut self, elapsed: Duration) {
        self.render.push(elapsed);
    }

    pub fn last_physics(&self) -> Duration {
        self.physics.last()
    }

    pub fn last_render(&self) -> Duration {
        self.render.last()
    }

    pub fn average_physics(&self) -> Duration {
        self.physics.average()
    }

    pub fn average_render(&self) -> Duration {
        self.render.average()
    }

    pub fn max_physics(&self) -> Duration {
        self.physics.max()
    }

    pub fn average_frame(&self) -> Duration {
        self.average_physics() + self.average_render()
    }

    /// Frames per second implied by the average physics + render time.
    pub fn fps(&self) -> f32 {
        let frame = self.average_frame().as_secs_f32();
        if frame > 0.0 {
            1.0 / frame
        } else {
            0.0
        }
    }

    pub fn physics_history_ms(&self) -> Vec<f32> {
        self.physics.history_ms()
    }

    pub fn clear(&mut self) {
        self.physics.samples.clear();
        self.render.samples.clear();
    }

    /// Timings block for the control panel.
    pub fn render_ui(&self, ui: &imgui::Ui) {
        ui.text(format!(
            "Physics: {:.2}ms (avg {:.2}ms, max {:.2}ms)",
            ms(self.last_physics()),
            ms(self.average_physics()),
            ms(self.max_physics())
        ));
        ui.text(format!(
            "Render: {:.2}ms (avg {:.2}ms)",
            ms(self.last_render()),
            ms(self.average_render())
        ));
        ui.text(format!("~{:.0} fps", self.fps()));

        let history = self.physics_history_ms();
        if !history.is_empty() {
            ui.plot_lines("##physics_times", &history)
                .graph_size([260.0, 50.0])
                .scale_min(0.0)
                .build();
        }
    }
}

fn ms(duration: Duration) -> f32 {
    duration.as_secs_f32() * 1000.0
}
