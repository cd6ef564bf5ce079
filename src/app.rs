use std::sync::Arc;

use anyhow::{Context as _, Result};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition, PhysicalSize},
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::AppConfig;
use crate::gfx::{
    particle_renderer::ParticleRenderer,
    render_engine::RenderEngine,
    ui::{
        panel::{control_panel, PanelState},
        UiManager,
    },
};
use crate::simulation::SimulationEngine;

pub struct AttractorApp {
    config: AppConfig,
    state: Option<AppState>,
    failure: Option<anyhow::Error>,
}

/// Everything that needs a window to exist.
struct AppState {
    window: Arc<Window>,
    render_engine: RenderEngine,
    renderer: ParticleRenderer,
    ui_manager: UiManager,
    panel: PanelState,
    engine: SimulationEngine,
}

impl AttractorApp {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: None,
            failure: None,
        }
    }

    /// Runs the event loop until the window closes.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new().context("failed to create event loop")?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop
            .run_app(&mut self)
            .context("event loop terminated abnormally")?;

        match self.failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{error:#}");
        self.failure = Some(error);
        event_loop.exit();
    }
}

impl AppState {
    fn create(event_loop: &ActiveEventLoop, config: &AppConfig) -> Result<Self> {
        let window = event_loop
            .create_window(
                WindowAttributes::default()
                    .with_title(config.title.clone())
                    .with_inner_size(LogicalSize::new(config.width, config.height)),
            )
            .context("failed to create window")?;
        let window = Arc::new(window);
        let (width, height) = window.inner_size().into();

        let render_engine = pollster::block_on(RenderEngine::new(window.clone(), width, height))
            .context("failed to initialise the GPU")?;

        let engine = SimulationEngine::new(render_engine.gpu().clone(), config.simulation.clone())
            .context("failed to create the simulation")?;

        let renderer = ParticleRenderer::new(render_engine.device(), render_engine.surface_format());
        let mut ui_manager = UiManager::new(
            render_engine.device(),
            render_engine.queue(),
            render_engine.surface_format(),
            &window,
        );
        ui_manager.update_display_size(width, height);

        Ok(Self {
            window,
            render_engine,
            renderer,
            ui_manager,
            panel: PanelState::default(),
            engine,
        })
    }

    /// Cursor position in pixels relative to the window centre.
    fn set_target(&mut self, position: PhysicalPosition<f64>) {
        let (width, height) = self.render_engine.size();
        self.engine.params_mut().target = [
            position.x as f32 - width as f32 / 2.0,
            position.y as f32 - height as f32 / 2.0,
        ];
    }

    fn redraw(&mut self) -> Result<()> {
        let Self {
            window,
            render_engine,
            renderer,
            ui_manager,
            panel,
            engine,
        } = self;

        ui_manager.update_logic(window, |ui| control_panel(ui, engine, panel));

        if let Err(e) = engine.step() {
            log::error!("Physics step failed: {e}");
        }
        engine.write_frame_uniforms(render_engine.half_size());

        let gpu = render_engine.gpu().clone();
        let (result, _) = engine.render_with(|frame| {
            render_engine.render_frame(|encoder, view| {
                renderer.draw(encoder, view, &frame);
                ui_manager.render_display_only(gpu.device(), gpu.queue(), encoder, view);
            })
        });
        result.context("failed to render frame")
    }
}

impl ApplicationHandler for AttractorApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match AppState::create(event_loop, &self.config) {
            Ok(state) => self.state = Some(state),
            Err(error) => self.fail(event_loop, error),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let ui_event: winit::event::Event<()> = winit::event::Event::WindowEvent {
            window_id,
            event: event.clone(),
        };
        if state.ui_manager.handle_input(&state.window, &ui_event) {
            return;
        }

        match event {
            WindowEvent::KeyboardInput {
                event:
                    winit::event::KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            }
            | WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::CursorMoved { position, .. } => state.set_target(position),
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Left,
                ..
            } => {
                state.engine.params_mut().attraction_active = attracts_while(button_state);
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                state.render_engine.resize(width, height);
                state.ui_manager.update_display_size(width, height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(error) = state.redraw() {
                    self.fail(event_loop, error);
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

/// Attraction is on only while the left button is held.
fn attracts_while(button: ElementState) -> bool {
    button == ElementState::Pressed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_ends_attraction() {
        assert!(attracts_while(ElementState::Pressed));
        assert!(!attracts_while(ElementState::Released));
    }
}
