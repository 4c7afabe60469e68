//! Windowed runner: opens a window, builds a render graph once, and executes it every frame.
//!
//! The runner owns the [`WgpuBackend`] and feeds it the engine uniforms it knows about
//! ([`InnerUniform::Time`], and the resolution through the backend's default). Pressing `D`
//! toggles the debug view.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::gpu::{GpuContext, GpuError};
use crate::render_graph::{CompiledRenderGraph, DebugViewConfig, FrameOptions, RenderGraphError};
use crate::shader_graph::InnerUniform;
use crate::wgpu_backend::{WgpuBackend, WgpuBackendError};

/// Error returned by a setup closure.
pub type SetupError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that stop the runner.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create the window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("setup failed: {0}")]
    Setup(SetupError),
    #[error(transparent)]
    Frame(#[from] RenderGraphError),
    #[error(transparent)]
    Backend(#[from] WgpuBackendError),
}

/// Window and frame settings.
///
/// ```
/// use phalanx::{AppConfig, DebugViewConfig};
///
/// let config = AppConfig::new()
///     .title("Bloom")
///     .size(1280, 720)
///     .debug_view(true)
///     .debug_config(DebugViewConfig::default().columns(2));
/// assert_eq!(config.width, 1280);
/// ```
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Whether the debug view is on at startup.
    pub debug_view: bool,
    pub debug: DebugViewConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Phalanx".to_string(),
            width: 800,
            height: 600,
            debug_view: false,
            debug: DebugViewConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn debug_view(mut self, enabled: bool) -> Self {
        self.debug_view = enabled;
        self
    }

    pub fn debug_config(mut self, config: DebugViewConfig) -> Self {
        self.debug = config;
        self
    }

    fn frame_options(&self) -> FrameOptions {
        FrameOptions::new()
            .debug_view(self.debug_view)
            .debug_config(self.debug)
    }
}

type SetupFn =
    Box<dyn FnOnce(&mut WgpuBackend) -> Result<CompiledRenderGraph<WgpuBackend>, SetupError>>;

struct Running {
    window: Arc<Window>,
    backend: WgpuBackend,
    graph: CompiledRenderGraph<WgpuBackend>,
    options: FrameOptions,
    start_time: Instant,
}

struct PhalanxApp {
    config: AppConfig,
    setup: Option<SetupFn>,
    running: Option<Running>,
    error: Option<AppError>,
}

/// Runs `setup` once the window exists, then renders the graph it returns until the window
/// closes.
///
/// # Example
/// ```ignore
/// phalanx::run(AppConfig::new().title("Composite"), |backend| {
///     let quad = FullscreenQuad::new(backend);
///     let program = backend.create_program("fill", &descriptor, &FullscreenQuad::layout())?;
///     let mut graph = RenderGraph::new();
///     graph.add_pass(PassNode::new("fill").override_shading(program).source(quad))?;
///     Ok(graph.build()?)
/// })?;
/// ```
pub fn run<S>(config: AppConfig, setup: S) -> Result<(), AppError>
where
    S: FnOnce(&mut WgpuBackend) -> Result<CompiledRenderGraph<WgpuBackend>, SetupError> + 'static,
{
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PhalanxApp {
        config,
        setup: Some(Box::new(setup)),
        running: None,
        error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

impl PhalanxApp {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let Some(setup) = self.setup.take() else {
            return Ok(());
        };
        let window_attrs = WindowAttributes::default()
            .with_title(&self.config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.config.width,
                self.config.height,
            ));
        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let mut backend = WgpuBackend::new(GpuContext::new(window.clone())?);
        let graph = setup(&mut backend).map_err(AppError::Setup)?;
        log::info!(
            "render graph ready: {}",
            graph.pass_names().collect::<Vec<_>>().join(" -> ")
        );

        self.running = Some(Running {
            window,
            backend,
            graph,
            options: self.config.frame_options(),
            start_time: Instant::now(),
        });
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: AppError) {
        log::error!("{err}");
        self.error = Some(err);
        event_loop.exit();
    }
}

impl Running {
    fn render_frame(&mut self) -> Result<(), AppError> {
        let time = self.start_time.elapsed().as_secs_f32();
        self.backend.set_inner_uniform(InnerUniform::Time, time)?;

        self.backend.begin_frame()?;
        let executed = self.graph.execute(&mut self.backend, &self.options);
        // The surface texture has to be handed back even when a pass failed.
        let ended = self.backend.end_frame();
        executed?;
        ended?;
        Ok(())
    }

    fn toggle_debug_view(&mut self) {
        self.options.debug_view = !self.options.debug_view;
        log::info!(
            "debug view {}",
            if self.options.debug_view { "on" } else { "off" }
        );
    }
}

impl ApplicationHandler for PhalanxApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(running) = &mut self.running else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                running.backend.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyD),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => running.toggle_debug_view(),
            WindowEvent::RedrawRequested => {
                match running.render_frame() {
                    Ok(()) => {}
                    Err(AppError::Backend(WgpuBackendError::Surface(
                        wgpu::SurfaceError::Timeout,
                    ))) => log::warn!("surface timed out; frame skipped"),
                    Err(err) => {
                        self.fail(event_loop, err);
                        return;
                    }
                }
                running.window.request_redraw();
            }
            _ => {}
        }
    }
}
