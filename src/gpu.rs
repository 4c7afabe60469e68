//! Core GPU context and device management.
//!
//! [`GpuContext`] owns the wgpu objects every other GPU type needs: the surface presenting to the
//! window, the device, the queue and the surface configuration. The [`WgpuBackend`] is built on
//! top of one.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use phalanx::GpuContext;
//!
//! # fn demo(window: Arc<winit::window::Window>) -> Result<(), phalanx::GpuError> {
//! let mut gpu = GpuContext::new(window)?;
//! gpu.resize(1280, 720);
//! println!("{}x{} (aspect: {})", gpu.width(), gpu.height(), gpu.aspect());
//! # Ok(())
//! # }
//! ```
//!
//! [`WgpuBackend`]: crate::WgpuBackend

use std::sync::Arc;

use thiserror::Error;
use winit::window::Window;

/// Errors raised while setting up the GPU.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to create a surface for the window: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable GPU adapter: {0}")]
    RequestAdapter(#[from] wgpu::RequestAdapterError),
    #[error("failed to create the GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("the surface supports no texture format on this adapter")]
    NoSurfaceFormat,
}

/// Core GPU context holding wgpu resources.
///
/// All fields are public so callers can reach the raw wgpu API when they need to, e.g. to build
/// the buffers of a custom [`RenderSource`](crate::RenderSource).
pub struct GpuContext {
    /// The surface for presenting rendered frames to the window.
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Creates a GPU context for a winit window.
    ///
    /// Uses the primary backends (Vulkan, Metal, DX12), prefers an sRGB surface format and
    /// presents with Fifo.
    pub fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))?;
        log::info!("using GPU adapter {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Phalanx Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(GpuError::NoSurfaceFormat)?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!(
            "surface configured: {}x{} {:?}",
            config.width,
            config.height,
            config.format
        );

        Ok(Self {
            surface,
            device,
            queue,
            config,
        })
    }

    /// Resizes the surface. Zero sizes (a minimized window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.reconfigure();
        }
    }

    /// Reapplies the current configuration, e.g. after the surface was lost.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Width divided by height.
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}
