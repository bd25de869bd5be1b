//! Projection and pan/zoom uniform values
//!
//! Node positions are given in canvas pixels with the origin at the top-left
//! and y pointing down. The vertex shader applies, in order:
//! `projection * (position * scale + translate)`.

/// Pan/zoom state pushed to the scale and translate uniforms
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Uniform zoom factor
    pub scale: f32,
    /// Translation in canvas pixels
    pub translate: [f32; 2],
}

impl Transform {
    /// Create a transform with the given zoom and translation
    pub fn new(scale: f32, translate_x: f32, translate_y: f32) -> Self {
        Self {
            scale,
            translate: [translate_x, translate_y],
        }
    }

    /// Value for the scale uniform (same factor on both axes)
    pub fn scale_uniform(&self) -> [f32; 2] {
        [self.scale, self.scale]
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}

/// Column-major 2D projection from canvas pixels to clip space.
///
/// `(0, 0)` maps to `(-1, 1)` and `(width, height)` to `(1, -1)`.
pub fn projection(width: f32, height: f32) -> [f32; 9] {
    [
        2.0 / width,
        0.0,
        0.0,
        0.0,
        -2.0 / height,
        0.0,
        -1.0,
        1.0,
        1.0,
    ]
}

/// Multiply a column-major 3x3 matrix by a homogeneous 2D point
pub fn project(matrix: &[f32; 9], point: [f32; 2]) -> [f32; 2] {
    let [x, y] = point;
    [
        matrix[0] * x + matrix[3] * y + matrix[6],
        matrix[1] * x + matrix[4] * y + matrix[7],
    ]
}
