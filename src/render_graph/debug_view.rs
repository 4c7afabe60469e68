//! Debug overlay layout: a grid of every target on the display surface.
//!
//! ```text
//! ┌──────────┬──────────┐
//! │  screen  │   hdr    │   cell 0 is always the screen,
//! ├──────────┼──────────┤   then offscreen targets in
//! │  bloom   │          │   registration order
//! └──────────┴──────────┘
//! ```

use glam::UVec2;
use indexmap::IndexMap;

use crate::render_graph::{RenderTargetNode, Viewport};

/// Shape of the debug grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebugViewConfig {
    /// Fixed column count; `None` picks the smallest square grid that fits every target.
    pub columns: Option<u32>,
    /// Gap in pixels kept free on each side of a cell.
    pub padding: u32,
}

impl Default for DebugViewConfig {
    fn default() -> Self {
        Self {
            columns: None,
            padding: 4,
        }
    }
}

impl DebugViewConfig {
    pub fn columns(mut self, columns: u32) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }
}

/// Per-frame execution options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameOptions {
    /// Shrinks the screen pass into a grid cell and shows every offscreen target beside it.
    pub debug_view: bool,
    pub debug: DebugViewConfig,
}

impl FrameOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug_view(mut self, enabled: bool) -> Self {
        self.debug_view = enabled;
        self
    }

    pub fn debug_config(mut self, config: DebugViewConfig) -> Self {
        self.debug = config;
        self
    }
}

/// Cells of a grid holding `count` views on a surface of `surface` pixels, row-major.
pub fn layout(count: usize, surface: UVec2, config: &DebugViewConfig) -> Vec<Viewport> {
    if count == 0 {
        return Vec::new();
    }
    let count = count as u32;
    let columns = config
        .columns
        .filter(|&columns| columns > 0)
        .unwrap_or_else(|| square_columns(count))
        .min(count);
    let rows = count.div_ceil(columns);

    let cell = UVec2::new(surface.x / columns, surface.y / rows);
    let padding = config.padding.min(cell.x / 2).min(cell.y / 2);
    (0..count)
        .map(|i| {
            let (column, row) = (i % columns, i / columns);
            Viewport::new(
                column * cell.x + padding,
                row * cell.y + padding,
                (cell.x - 2 * padding).max(1),
                (cell.y - 2 * padding).max(1),
            )
        })
        .collect()
}

/// Smallest `c` with `c * c >= count`.
fn square_columns(count: u32) -> u32 {
    let mut columns = 1;
    while columns * columns < count {
        columns += 1;
    }
    columns
}

/// Assigns each target its debug viewport: the screen first, then offscreen targets in order.
pub(crate) fn assign(
    targets: &mut IndexMap<String, RenderTargetNode>,
    surface: UVec2,
    config: &DebugViewConfig,
) {
    let mut cells = layout(targets.len(), surface, config).into_iter();
    for screen in [true, false] {
        for target in targets.values_mut().filter(|t| t.is_screen() == screen) {
            target.set_debug_viewport(cells.next());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_as_square_as_possible() {
        let cells = layout(3, UVec2::new(800, 600), &DebugViewConfig::default().padding(0));
        assert_eq!(
            cells,
            [
                Viewport::new(0, 0, 400, 300),
                Viewport::new(400, 0, 400, 300),
                Viewport::new(0, 300, 400, 300),
            ]
        );
        assert_eq!(
            layout(1, UVec2::new(800, 600), &DebugViewConfig::default().padding(0)),
            [Viewport::new(0, 0, 800, 600)]
        );
        assert_eq!(layout(5, UVec2::new(900, 900), &DebugViewConfig::default()).len(), 5);
        assert!(layout(0, UVec2::new(800, 600), &DebugViewConfig::default()).is_empty());
    }

    #[test]
    fn columns_override_and_padding() {
        let config = DebugViewConfig::default().columns(4).padding(10);
        let cells = layout(2, UVec2::new(800, 600), &config);
        // Column count is capped by the number of views.
        assert_eq!(
            cells,
            [Viewport::new(10, 10, 380, 580), Viewport::new(410, 10, 380, 580)]
        );
    }

    #[test]
    fn screen_takes_the_first_cell() {
        let mut targets = IndexMap::new();
        targets.insert("hdr".to_string(), RenderTargetNode::new("hdr"));
        targets.insert("screen".to_string(), RenderTargetNode::screen());
        targets.insert("bloom".to_string(), RenderTargetNode::new("bloom"));

        let config = DebugViewConfig::default().padding(0);
        assign(&mut targets, UVec2::new(800, 600), &config);
        assert_eq!(targets["screen"].debug_viewport(), Some(Viewport::new(0, 0, 400, 300)));
        assert_eq!(targets["hdr"].debug_viewport(), Some(Viewport::new(400, 0, 400, 300)));
        assert_eq!(targets["bloom"].debug_viewport(), Some(Viewport::new(0, 300, 400, 300)));
    }
}
