//! Synthetic node layouts for demos and benchmarks

use crate::record::NodeRecord;

/// Golden angle in radians, spreads spiral points evenly
const GOLDEN_ANGLE: f32 = 2.399_963;

/// Lay out `count` nodes on a phyllotaxis spiral centered in the canvas.
///
/// Radii and colors vary with the index so consecutive batches are
/// distinguishable.
pub fn spiral(count: usize, width: u32, height: u32) -> Vec<NodeRecord> {
    let center = [width as f32 / 2.0, height as f32 / 2.0];
    let max_extent = center[0].min(center[1]);
    let spacing = if count > 1 {
        max_extent / (count as f32).sqrt()
    } else {
        0.0
    };

    (0..count)
        .map(|i| {
            let t = i as f32;
            let distance = spacing * t.sqrt();
            let angle = t * GOLDEN_ANGLE;
            let hue = (i % 360) as f32 / 360.0;
            let [r, g, b] = hue_to_rgb(hue);

            NodeRecord::new(
                center[0] + distance * angle.cos(),
                center[1] + distance * angle.sin(),
            )
            .with_radius(2.0 + (i % 5) as f32)
            .with_fill(r, g, b, 1.0)
            .with_stroke(1.0, [1.0, 1.0, 1.0, 0.8])
        })
        .collect()
}

/// Fully saturated color for `hue` in `0.0..1.0`
fn hue_to_rgb(hue: f32) -> [f32; 3] {
    let h = hue * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let [r, g, b] = match h as u32 {
        0 => [1.0, x, 0.0],
        1 => [x, 1.0, 0.0],
        2 => [0.0, 1.0, x],
        3 => [0.0, x, 1.0],
        4 => [x, 0.0, 1.0],
        _ => [1.0, 0.0, x],
    };
    [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::validate;

    #[test]
    fn test_spiral_count_and_validity() {
        let nodes = spiral(500, 800, 600);
        assert_eq!(nodes.len(), 500);
        for node in &nodes {
            assert!(validate(node).is_ok(), "{:?}", node);
        }
    }

    #[test]
    fn test_spiral_stays_on_canvas() {
        for node in spiral(1000, 800, 600) {
            let [x, y] = node.position;
            assert!((100.0..=700.0).contains(&x), "x = {}", x);
            assert!((0.0..=600.0).contains(&y), "y = {}", y);
        }
    }

    #[test]
    fn test_single_node_is_centered() {
        let nodes = spiral(1, 800, 600);
        assert_eq!(nodes[0].position, [400.0, 300.0]);
    }

    #[test]
    fn test_hue_primaries() {
        assert_eq!(hue_to_rgb(0.0), [1.0, 0.0, 0.0]);
        assert_eq!(hue_to_rgb(0.5), [0.0, 1.0, 1.0]);
    }
}
