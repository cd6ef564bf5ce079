use imgui::Ui;

use crate::simulation::params::{
    damping_from_slider, power_from_slider, slider_from_damping, slider_from_power,
};
use crate::simulation::{SimulationEngine, UpdateMode};

/// Widget state that lives across frames.
#[derive(Debug, Clone, Default)]
pub struct PanelState {
    last_error: Option<String>,
}

impl PanelState {
    fn report<E: std::fmt::Display>(&mut self, action: &str, result: Result<(), E>) {
        match result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                log::error!("{action} failed: {e}");
                self.last_error = Some(format!("{action}: {e}"));
            }
        }
    }
}

/// Control panel window: particle count, forces, looks, backend.
pub fn control_panel(ui: &Ui, engine: &mut SimulationEngine, state: &mut PanelState) {
    ui.window("Attractor")
        .size([360.0, 560.0], imgui::Condition::FirstUseEver)
        .position([10.0, 10.0], imgui::Condition::FirstUseEver)
        .build(|| {
            particles_section(ui, engine, state);
            ui.separator();
            forces_section(ui, engine);
            ui.separator();
            looks_section(ui, engine);
            ui.separator();
            backend_section(ui, engine, state);
            ui.separator();
            engine.timings().render_ui(ui);

            if let Some(error) = &state.last_error {
                ui.separator();
                ui.text_colored([1.0, 0.4, 0.4, 1.0], error);
            }
        });
}

fn particles_section(ui: &Ui, engine: &mut SimulationEngine, state: &mut PanelState) {
    ui.text(format!(
        "Particles: {} (max {})",
        engine.num_particles(),
        engine.max_particles()
    ));

    if ui.button("x2") {
        state.report("Doubling particles", engine.mul2());
    }
    ui.same_line();
    if ui.button("/2") {
        state.report("Halving particles", engine.div2());
    }
    ui.same_line();
    if ui.button("Reset") {
        state.report("Reset", engine.reset());
    }
}

fn forces_section(ui: &Ui, engine: &mut SimulationEngine) {
    let params = engine.params_mut();

    ui.checkbox("Attraction", &mut params.attraction_active);
    ui.text(format!(
        "Target: ({:.0}, {:.0})",
        params.target[0], params.target[1]
    ));

    let mut damping_slider = slider_from_damping(params.damping);
    if ui.slider("Energy conservation", 0.0, 1.0, &mut damping_slider) {
        params.damping = damping_from_slider(damping_slider);
    }
    ui.input_float("Damping", &mut params.damping)
        .display_format("%.6f")
        .build();

    let mut power_slider = slider_from_power(params.power);
    if ui.slider("Attraction power", 0.0, 100.0, &mut power_slider) {
        params.power = power_from_slider(power_slider);
    }
    ui.input_float("Power", &mut params.power).build();
}

fn looks_section(ui: &Ui, engine: &mut SimulationEngine) {
    let params = engine.params_mut();

    ui.color_edit4("Origin colour", &mut params.color_origin);
    ui.color_edit4("Fast colour", &mut params.color_fast);
    ui.slider("Alpha", 0.0, 1.0, &mut params.alpha);
    ui.slider("Size", 0.5, 10.0, &mut params.particle_size);
}

fn backend_section(ui: &Ui, engine: &mut SimulationEngine, state: &mut PanelState) {
    let mut mode_index = UpdateMode::ALL
        .iter()
        .position(|mode| *mode == engine.mode())
        .unwrap_or(0);
    if ui.combo("Update mode", &mut mode_index, &UpdateMode::ALL, |mode| {
        std::borrow::Cow::Borrowed(mode.label())
    }) {
        let target = UpdateMode::ALL[mode_index];
        state.report("Mode switch", engine.set_mode(target));
    }

    let mut threads = engine.num_threads() as i32;
    let max_threads = (num_cpus::get() * 2).max(1) as i32;
    if ui.slider("Threads", 1, max_threads, &mut threads) {
        state.report("Resizing worker pool", engine.set_thread_count(threads.max(1) as usize));
    }

    let mut paused = engine.is_paused();
    if ui.checkbox("Pause", &mut paused) {
        engine.set_paused(paused);
    }
}
