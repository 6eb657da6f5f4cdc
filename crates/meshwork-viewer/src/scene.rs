//! Static demo geometry.

use glam::Vec3;
use meshwork_engine::render::{ColoredVertex, PathVertex};

const GOLDEN_ANGLE: f32 = 2.399_963;

/// Square pyramid centred on the origin of its base, as a triangle list with
/// flat per-face normals. Faces wind counter-clockwise seen from outside.
pub fn pyramid(half_base: f32, height: f32, color: [f32; 4]) -> Vec<ColoredVertex> {
    let apex = Vec3::new(0.0, height, 0.0);
    let corners = [
        Vec3::new(-half_base, 0.0, -half_base),
        Vec3::new(half_base, 0.0, -half_base),
        Vec3::new(half_base, 0.0, half_base),
        Vec3::new(-half_base, 0.0, half_base),
    ];
    let centre = Vec3::new(0.0, height * 0.25, 0.0);

    let mut faces = Vec::with_capacity(6);
    for i in 0..4 {
        faces.push([corners[i], corners[(i + 1) % 4], apex]);
    }
    faces.push([corners[0], corners[1], corners[2]]);
    faces.push([corners[0], corners[2], corners[3]]);

    let mut vertices = Vec::with_capacity(faces.len() * 3);
    for [a, mut b, mut c] in faces {
        let mut normal = (b - a).cross(c - a).normalize_or_zero();
        let face_centre = (a + b + c) / 3.0;
        if normal.dot(face_centre - centre) < 0.0 {
            std::mem::swap(&mut b, &mut c);
            normal = -normal;
        }
        for p in [a, b, c] {
            vertices.push(ColoredVertex::new(p.to_array(), normal.to_array(), color));
        }
    }
    vertices
}

/// Deterministic point cloud on a disc (sunflower pattern) at height `y`.
pub fn point_disc(count: usize, radius: f32, y: f32) -> Vec<PathVertex> {
    (0..count)
        .map(|i| {
            let t = (i as f32 + 0.5) / count.max(1) as f32;
            let r = radius * t.sqrt();
            let a = i as f32 * GOLDEN_ANGLE;
            PathVertex::new(
                [r * a.cos(), y, r * a.sin()],
                [0.0, 1.0, 0.0],
                [0.9, 0.9 - 0.6 * t, 0.2, 1.0],
                0,
            )
        })
        .collect()
}
