//! Render targets: named outputs of passes, and the display surface.

use glam::{UVec2, Vec2};

/// Name of the target representing the display surface.
pub const SCREEN_TARGET: &str = "screen";

/// Size of an offscreen target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetSize {
    /// Fixed size in pixels.
    Absolute(UVec2),
    /// Fraction of the surface size, e.g. `Vec2::splat(0.5)` for half resolution.
    Relative(Vec2),
}

impl TargetSize {
    /// Pixel size for a surface of `surface` pixels. Never zero in either dimension.
    pub fn resolve(self, surface: UVec2) -> UVec2 {
        let size = match self {
            TargetSize::Absolute(size) => size,
            TargetSize::Relative(scale) => (surface.as_vec2() * scale).round().as_uvec2(),
        };
        size.max(UVec2::ONE)
    }
}

impl Default for TargetSize {
    fn default() -> Self {
        TargetSize::Relative(Vec2::ONE)
    }
}

/// A rectangle of a render target in pixels, origin at the top left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A viewport covering a whole target of `size` pixels.
    pub fn full(size: UVec2) -> Self {
        Self::new(0, 0, size.x, size.y)
    }
}

/// What a backend needs to allocate the framebuffer behind a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub name: String,
    pub size: UVec2,
    pub depth: bool,
}

/// A named render target.
///
/// Offscreen targets are created by the caller and registered with
/// [`RenderGraph::add_target`](crate::RenderGraph::add_target); the graph creates the single
/// screen target itself.
///
/// # Example
///
/// ```
/// use phalanx::RenderTargetNode;
///
/// let hdr = RenderTargetNode::new("hdr");                // surface-sized, with depth
/// let bloom = RenderTargetNode::new("bloom")
///     .relative(0.5, 0.5)
///     .depth(false);
/// let shadow = RenderTargetNode::new("shadow").absolute(2048, 2048);
/// # let _ = (hdr, bloom, shadow);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetNode {
    name: String,
    size: TargetSize,
    depth: bool,
    is_screen: bool,
    debug_viewport: Option<Viewport>,
}

impl RenderTargetNode {
    /// Creates a surface-sized offscreen target with a depth buffer.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: TargetSize::default(),
            depth: true,
            is_screen: false,
            debug_viewport: None,
        }
    }

    pub(crate) fn screen() -> Self {
        Self {
            is_screen: true,
            ..Self::new(SCREEN_TARGET)
        }
    }

    pub fn size(mut self, size: TargetSize) -> Self {
        self.size = size;
        self
    }

    pub fn absolute(self, width: u32, height: u32) -> Self {
        self.size(TargetSize::Absolute(UVec2::new(width, height)))
    }

    pub fn relative(self, width: f32, height: f32) -> Self {
        self.size(TargetSize::Relative(Vec2::new(width, height)))
    }

    /// Whether the target has a depth buffer.
    pub fn depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_size(&self) -> TargetSize {
        self.size
    }

    pub fn has_depth(&self) -> bool {
        self.depth
    }

    pub fn is_screen(&self) -> bool {
        self.is_screen
    }

    /// Where the debug overlay shows this target. Assigned when a frame runs in debug mode.
    pub fn debug_viewport(&self) -> Option<Viewport> {
        self.debug_viewport
    }

    pub(crate) fn set_debug_viewport(&mut self, viewport: Option<Viewport>) {
        self.debug_viewport = viewport;
    }

    /// Framebuffer description for a surface of `surface` pixels.
    pub fn descriptor(&self, surface: UVec2) -> FramebufferDescriptor {
        FramebufferDescriptor {
            name: self.name.clone(),
            size: self.size.resolve(surface),
            depth: self.depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_sizes_follow_the_surface() {
        let surface = UVec2::new(1280, 720);
        assert_eq!(TargetSize::default().resolve(surface), surface);
        assert_eq!(
            TargetSize::Relative(Vec2::splat(0.5)).resolve(surface),
            UVec2::new(640, 360)
        );
        assert_eq!(
            TargetSize::Absolute(UVec2::new(256, 128)).resolve(surface),
            UVec2::new(256, 128)
        );
    }

    #[test]
    fn resolved_sizes_are_never_zero() {
        assert_eq!(
            TargetSize::Relative(Vec2::ZERO).resolve(UVec2::new(800, 600)),
            UVec2::ONE
        );
        assert_eq!(TargetSize::default().resolve(UVec2::ZERO), UVec2::ONE);
    }

    #[test]
    fn descriptor_carries_name_size_and_depth() {
        let target = RenderTargetNode::new("bloom").relative(0.25, 0.25).depth(false);
        let descriptor = target.descriptor(UVec2::new(800, 600));
        assert_eq!(
            descriptor,
            FramebufferDescriptor {
                name: "bloom".into(),
                size: UVec2::new(200, 150),
                depth: false,
            }
        );
        assert!(!target.is_screen());
        assert!(RenderTargetNode::screen().is_screen());
    }
}
