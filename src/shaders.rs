//! WGSL shaders for instanced circle nodes
//!
//! The vertex stage expands the shared quad template around each node and the
//! fragment stage cuts an anti-aliased disc with a stroke ring out of it.
//! Vertex input locations must match [`crate::schema::Attribute`].

/// Entry point of the node vertex stage
pub const VERTEX_ENTRY_POINT: &str = "vs_node";

/// Entry point of the node fragment stage
pub const FRAGMENT_ENTRY_POINT: &str = "fs_node";

/// Uniform block shared by both stages
///
/// Layout (bytes): projection 0..48, scale 48..56, translate 56..64,
/// viewport 64..72, struct size 80.
pub const NODE_UNIFORMS: &str = r#"
struct NodeUniforms {
    projection: mat3x3<f32>,
    scale: vec2<f32>,
    translate: vec2<f32>,
    viewport: vec2<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: NodeUniforms;
"#;

/// Interpolants passed from the vertex to the fragment stage
pub const NODE_VARYINGS: &str = r#"
struct NodeVaryings {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) local_px: vec2<f32>,
    @location(1) fill: vec4<f32>,
    @location(2) stroke_color: vec4<f32>,
    @location(3) radius_px: f32,
    @location(4) stroke_px: f32,
}
"#;

/// Node vertex shader body
pub const NODE_VERTEX_SHADER: &str = r#"
@vertex
fn vs_node(
    @location(0) a_template: vec3<f32>,
    @location(1) a_position: vec2<f32>,
    @location(2) a_size: f32,
    @location(3) a_color: vec4<f32>,
    @location(4) a_stroke_width: f32,
    @location(5) a_stroke_color: vec4<f32>,
) -> NodeVaryings {
    var out: NodeVaryings;

    // Outer edge of the stroke plus one screen pixel for the AA ramp
    let zoom = uniforms.scale.x;
    let extent = a_size + a_stroke_width * 0.5 + 1.0 / zoom;
    let offset = a_template.xy * extent;

    let canvas = (a_position + offset) * uniforms.scale + uniforms.translate;
    let clip = uniforms.projection * vec3<f32>(canvas, a_template.z);
    out.clip_position = vec4<f32>(clip.xy, 0.0, 1.0);

    out.local_px = offset * zoom;
    out.fill = a_color;
    out.stroke_color = a_stroke_color;
    out.radius_px = a_size * zoom;
    out.stroke_px = a_stroke_width * zoom;

    return out;
}
"#;

/// Node fragment shader body
pub const NODE_FRAGMENT_SHADER: &str = r#"
@fragment
fn fs_node(in: NodeVaryings) -> @location(0) vec4<f32> {
    let dist = length(in.local_px);
    let half_stroke = in.stroke_px * 0.5;

    let coverage = clamp(in.radius_px + half_stroke - dist + 0.5, 0.0, 1.0);
    if (coverage <= 0.0) {
        discard;
    }

    let ring = clamp(dist - (in.radius_px - half_stroke) + 0.5, 0.0, 1.0);
    let stroke_mix = select(ring, 0.0, in.stroke_px <= 0.0);
    let color = mix(in.fill, in.stroke_color, stroke_mix);

    return vec4<f32>(color.rgb, color.a * coverage);
}
"#;

/// Get the complete node vertex shader source
pub fn node_vertex_shader() -> String {
    format!(
        "{}\n{}\n{}",
        NODE_UNIFORMS, NODE_VARYINGS, NODE_VERTEX_SHADER
    )
}

/// Get the complete node fragment shader source
pub fn node_fragment_shader() -> String {
    format!(
        "{}\n{}\n{}",
        NODE_UNIFORMS, NODE_VARYINGS, NODE_FRAGMENT_SHADER
    )
}
