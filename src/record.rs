//! Node records: the data source read by the instance store
//!
//! Any type implementing [`NodeSource`] can be appended. [`NodeRecord`] is a
//! plain implementation for callers without their own node type.

use serde::{Deserialize, Serialize};

/// Default node radius in canvas pixels
pub const DEFAULT_NODE_RADIUS: f32 = 5.0;

/// Default node fill (gray)
pub const DEFAULT_FILL: [f32; 4] = [0.5, 0.5, 0.5, 1.0];

/// Default stroke width in canvas pixels
pub const DEFAULT_STROKE_WIDTH: f32 = 1.0;

/// Default stroke color (white)
pub const DEFAULT_STROKE_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Read-only view of a node's visual attributes.
///
/// Position and radius share the canvas coordinate space; color channels are
/// normalized to `0.0..=1.0`.
pub trait NodeSource {
    fn position(&self) -> [f32; 2];
    fn radius(&self) -> f32;
    fn fill(&self) -> [f32; 4];
    fn stroke_width(&self) -> f32;
    fn stroke_color(&self) -> [f32; 4];
}

impl<T: NodeSource + ?Sized> NodeSource for &T {
    fn position(&self) -> [f32; 2] {
        (**self).position()
    }

    fn radius(&self) -> f32 {
        (**self).radius()
    }

    fn fill(&self) -> [f32; 4] {
        (**self).fill()
    }

    fn stroke_width(&self) -> f32 {
        (**self).stroke_width()
    }

    fn stroke_color(&self) -> [f32; 4] {
        (**self).stroke_color()
    }
}

/// A node ready to be streamed to the GPU
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRecord {
    /// Center in canvas pixels
    pub position: [f32; 2],
    /// Radius in canvas pixels
    pub radius: f32,
    /// Fill color RGBA
    pub fill: [f32; 4],
    /// Stroke width in canvas pixels
    pub stroke_width: f32,
    /// Stroke color RGBA
    pub stroke_color: [f32; 4],
}

impl NodeRecord {
    /// Create a node at the given position with default styling
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            position: [x, y],
            radius: DEFAULT_NODE_RADIUS,
            fill: DEFAULT_FILL,
            stroke_width: DEFAULT_STROKE_WIDTH,
            stroke_color: DEFAULT_STROKE_COLOR,
        }
    }

    /// Set the radius
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }

    /// Set the fill color
    pub fn with_fill(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.fill = [r, g, b, a];
        self
    }

    /// Set the stroke width and color
    pub fn with_stroke(mut self, width: f32, color: [f32; 4]) -> Self {
        self.stroke_width = width;
        self.stroke_color = color;
        self
    }
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl NodeSource for NodeRecord {
    fn position(&self) -> [f32; 2] {
        self.position
    }

    fn radius(&self) -> f32 {
        self.radius
    }

    fn fill(&self) -> [f32; 4] {
        self.fill
    }

    fn stroke_width(&self) -> f32 {
        self.stroke_width
    }

    fn stroke_color(&self) -> [f32; 4] {
        self.stroke_color
    }
}

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq)]
pub struct RecordViolation {
    pub field: &'static str,
    pub reason: String,
}

/// Check that every value a record exposes can be rendered.
pub fn validate<N: NodeSource + ?Sized>(node: &N) -> Result<(), RecordViolation> {
    let [x, y] = node.position();
    finite("position", x)?;
    finite("position", y)?;
    non_negative("radius", node.radius())?;
    unit_color("fill", node.fill())?;
    non_negative("stroke_width", node.stroke_width())?;
    unit_color("stroke_color", node.stroke_color())?;
    Ok(())
}

fn finite(field: &'static str, value: f32) -> Result<(), RecordViolation> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(RecordViolation {
            field,
            reason: format!("{} is not finite", value),
        })
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), RecordViolation> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(RecordViolation {
            field,
            reason: format!("{} is negative", value),
        });
    }
    Ok(())
}

fn unit_color(field: &'static str, rgba: [f32; 4]) -> Result<(), RecordViolation> {
    for channel in rgba {
        finite(field, channel)?;
        if !(0.0..=1.0).contains(&channel) {
            return Err(RecordViolation {
                field,
                reason: format!("channel {} outside 0.0..=1.0", channel),
            });
        }
    }
    Ok(())
}
