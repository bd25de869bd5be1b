//! Vertex attribute schema for instanced node rendering
//!
//! The attribute order is fixed and must match the `@location` declarations
//! in the node vertex shader. Every attribute lives in its own GPU buffer, so
//! each one can be partially updated with a single linear byte range.

use std::fmt;

/// Size in bytes of one attribute element (all attributes are `f32`)
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

/// Number of vertices in the shared draw template
pub const TEMPLATE_VERTEX_COUNT: u32 = 4;

/// Shared per-vertex template geometry: a quad as `(x, y, w)` triples.
///
/// Ordered for a triangle strip (`0-1-2`, `1-2-3`). The quad spans `[-1, 1]`
/// on both axes, which fully covers a unit circle.
pub const TEMPLATE_VERTICES: [f32; 12] = [
    -1.0, -1.0, 1.0, //
    1.0, -1.0, 1.0, //
    -1.0, 1.0, 1.0, //
    1.0, 1.0, 1.0,
];

/// Every vertex attribute, in binding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Built-in quad template (per-vertex)
    Template,
    /// Node center in canvas pixels
    Position,
    /// Node radius in canvas pixels
    Size,
    /// Fill color RGBA
    Color,
    /// Stroke width in canvas pixels
    StrokeWidth,
    /// Stroke color RGBA
    StrokeColor,
}

impl Attribute {
    /// All attributes in binding order
    pub const ALL: [Attribute; 6] = [
        Attribute::Template,
        Attribute::Position,
        Attribute::Size,
        Attribute::Color,
        Attribute::StrokeWidth,
        Attribute::StrokeColor,
    ];

    /// Attributes that advance once per instance
    pub const INSTANCED: [Attribute; 5] = [
        Attribute::Position,
        Attribute::Size,
        Attribute::Color,
        Attribute::StrokeWidth,
        Attribute::StrokeColor,
    ];

    /// Position of this attribute in [`Attribute::ALL`]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Static descriptor for this attribute
    pub const fn descriptor(self) -> AttributeDescriptor {
        match self {
            Attribute::Template => AttributeDescriptor::new("a_template", 0, 3, true),
            Attribute::Position => AttributeDescriptor::new("a_position", 1, 2, false),
            Attribute::Size => AttributeDescriptor::new("a_size", 2, 1, false),
            Attribute::Color => AttributeDescriptor::new("a_color", 3, 4, false),
            Attribute::StrokeWidth => AttributeDescriptor::new("a_stroke_width", 4, 1, false),
            Attribute::StrokeColor => AttributeDescriptor::new("a_stroke_color", 5, 4, false),
        }
    }
}

/// Description of one vertex attribute.
///
/// Immutable once built. Backing arrays and GPU buffers are owned by the
/// [`InstanceStore`](crate::store::InstanceStore), not by the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Shader input name
    pub name: &'static str,
    /// Shader location / binding slot
    pub binding_index: u32,
    /// Scalar components per element (1-4)
    pub component_count: usize,
    /// True only for the shared per-vertex template
    pub is_built_in: bool,
}

impl AttributeDescriptor {
    const fn new(
        name: &'static str,
        binding_index: u32,
        component_count: usize,
        is_built_in: bool,
    ) -> Self {
        Self {
            name,
            binding_index,
            component_count,
            is_built_in,
        }
    }

    /// Byte distance between consecutive elements
    pub const fn stride(&self) -> usize {
        self.component_count * ELEMENT_SIZE
    }

    /// Divisor for this attribute: 0 advances per vertex, 1 per instance
    pub const fn divisor(&self) -> u32 {
        if self.is_built_in { 0 } else { 1 }
    }

    /// Length of the backing array for a store holding `limit` instances,
    /// or `None` if it does not fit in `usize`
    pub const fn backing_len(&self, limit: usize) -> Option<usize> {
        if self.is_built_in {
            Some(TEMPLATE_VERTICES.len())
        } else {
            self.component_count.checked_mul(limit)
        }
    }
}

impl fmt::Display for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<16} location={} components={} stride={:>2} step={}",
            self.name,
            self.binding_index,
            self.component_count,
            self.stride(),
            if self.is_built_in { "vertex" } else { "instance" }
        )
    }
}

/// Build the ordered attribute schema.
pub fn build_schema() -> [AttributeDescriptor; 6] {
    Attribute::ALL.map(Attribute::descriptor)
}

/// Number of floats written per instance across all per-instance attributes
pub fn instance_floats() -> usize {
    Attribute::INSTANCED
        .iter()
        .map(|attribute| attribute.descriptor().component_count)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_order_matches_binding_indices() {
        let schema = build_schema();
        for (i, descriptor) in schema.iter().enumerate() {
            assert_eq!(descriptor.binding_index as usize, i);
            assert_eq!(Attribute::ALL[i].index(), i);
        }
    }

    #[test]
    fn test_exactly_one_built_in() {
        let schema = build_schema();
        let built_in: Vec<_> = schema.iter().filter(|d| d.is_built_in).collect();
        assert_eq!(built_in.len(), 1);
        assert_eq!(built_in[0].name, "a_template");
        assert_eq!(built_in[0].component_count, 3);
    }

    #[test]
    fn test_instanced_component_counts() {
        let counts: Vec<usize> = Attribute::INSTANCED
            .iter()
            .map(|a| a.descriptor().component_count)
            .collect();
        assert_eq!(counts, vec![2, 1, 4, 1, 4]);
        assert_eq!(instance_floats(), 12);
    }

    #[test]
    fn test_template_is_homogeneous_quad() {
        assert_eq!(
            TEMPLATE_VERTICES.len(),
            TEMPLATE_VERTEX_COUNT as usize * 3
        );
        for vertex in TEMPLATE_VERTICES.chunks(3) {
            assert_eq!(vertex[0].abs(), 1.0);
            assert_eq!(vertex[1].abs(), 1.0);
            assert_eq!(vertex[2], 1.0);
        }
    }

    #[test]
    fn test_stride_and_divisor() {
        let color = Attribute::Color.descriptor();
        assert_eq!(color.stride(), 16);
        assert_eq!(color.divisor(), 1);

        let template = Attribute::Template.descriptor();
        assert_eq!(template.stride(), 12);
        assert_eq!(template.divisor(), 0);
    }

    #[test]
    fn test_backing_len() {
        assert_eq!(Attribute::Position.descriptor().backing_len(10), Some(20));
        assert_eq!(Attribute::Size.descriptor().backing_len(10), Some(10));
        // template never scales with the limit
        assert_eq!(Attribute::Template.descriptor().backing_len(10_000), Some(12));
        assert_eq!(Attribute::Color.descriptor().backing_len(usize::MAX), None);
        assert_eq!(Attribute::Template.descriptor().backing_len(usize::MAX), Some(12));
    }
}
