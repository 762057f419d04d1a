//! Mesh data and procedural generation

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Vertex as the mesh shaders pull it from the combined vertex buffer.
///
/// UVs are split across the padding slots of the two `Vec3`s so the struct
/// packs into three 16-byte rows.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            uv_x: uv.x,
            normal,
            uv_y: uv.y,
            color: Vec4::ONE,
        }
    }

    pub fn uv(&self) -> Vec2 {
        Vec2::new(self.uv_x, self.uv_y)
    }
}

/// CPU-side mesh as handed over by the scene loader.
///
/// Consumed once when the renderer builds its GPU buffers.
#[derive(Debug, Clone)]
pub struct RawMesh {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    /// Index into the scene's material list
    pub material: usize,
    pub transparent: bool,
}

impl RawMesh {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
            material: 0,
            transparent: false,
        }
    }

    pub fn with_material(mut self, material: usize) -> Self {
        self.material = material;
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        for vertex in &mut self.vertices {
            vertex.color = color;
        }
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Unit cube centered at the origin, four vertices per face
    pub fn cube() -> Self {
        let mut mesh = RawMesh::new("cube");

        // (normal, u axis, v axis) per face
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 0.0),
        ];

        for (normal, u_axis, v_axis) in faces {
            let base = mesh.vertices.len() as u32;
            for uv in corners {
                let position = normal * 0.5 + u_axis * (uv.x - 0.5) + v_axis * (0.5 - uv.y);
                mesh.vertices.push(Vertex::new(position, normal, uv));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = RawMesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        for ring in 0..=rings {
            let phi = ring as f32 * std::f32::consts::PI / rings as f32;
            for segment in 0..=segments {
                let theta = segment as f32 * std::f32::consts::TAU / segments as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                let uv = Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                );
                mesh.vertices.push(Vertex::new(normal * 0.5, normal, uv));
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * stride + segment;
                let below = current + stride;
                mesh.indices.extend_from_slice(&[
                    current,
                    below,
                    current + 1,
                    current + 1,
                    below,
                    below + 1,
                ]);
            }
        }

        mesh
    }

    /// Subdivided plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = RawMesh::new("plane");
        let subdivisions = subdivisions.max(1);
        let n = subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let uv = Vec2::new(x as f32 / n, z as f32 / n);
                let position = Vec3::new((uv.x - 0.5) * width, 0.0, (uv.y - 0.5) * depth);
                mesh.vertices.push(Vertex::new(position, Vec3::Y, uv));
            }
        }

        let stride = subdivisions + 1;
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * stride + x;
                let next = current + stride;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }
}

/// Per-mesh bounding sphere read by the culling kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Sphere around the mean of `vertices`.
    ///
    /// The radius is bumped to the next representable `f32` so rounding never
    /// places a vertex outside the sphere. An empty mesh yields a zero sphere.
    pub fn from_vertices(vertices: &[Vertex]) -> Self {
        if vertices.is_empty() {
            return Self::zeroed();
        }

        let sum = vertices.iter().fold(Vec3::ZERO, |acc, v| acc + v.position);
        let center = sum / vertices.len() as f32;
        let max_distance_sq = vertices
            .iter()
            .map(|v| v.position.distance_squared(center))
            .fold(0.0f32, f32::max);

        Self {
            center,
            radius: next_up(max_distance_sq.sqrt()),
        }
    }
}

/// Smallest `f32` greater than a non-negative finite `x`
fn next_up(x: f32) -> f32 {
    if !x.is_finite() {
        return x;
    }
    if x == 0.0 {
        return f32::from_bits(1);
    }
    f32::from_bits(x.to_bits() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, z: f32) -> Vertex {
        Vertex::new(Vec3::new(x, y, z), Vec3::Y, Vec2::ZERO)
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::size_of::<BoundingSphere>(), 16);
    }

    #[test]
    fn test_bounding_sphere_of_segment() {
        let sphere = BoundingSphere::from_vertices(&[at(0.0, 0.0, 0.0), at(2.0, 0.0, 0.0)]);
        assert_eq!(sphere.center, Vec3::new(1.0, 0.0, 0.0));
        assert!(sphere.radius >= 1.0);
        assert!(sphere.radius - 1.0 <= f32::EPSILON);
    }

    #[test]
    fn test_bounding_sphere_contains_every_vertex() {
        let mesh = RawMesh::sphere(12, 8);
        let sphere = BoundingSphere::from_vertices(&mesh.vertices);
        for vertex in &mesh.vertices {
            assert!(vertex.position.distance(sphere.center) <= sphere.radius);
        }
    }

    #[test]
    fn test_empty_bounding_sphere() {
        assert_eq!(BoundingSphere::from_vertices(&[]), BoundingSphere::zeroed());
    }

    #[test]
    fn test_next_up() {
        assert!(next_up(1.0) > 1.0);
        assert!(next_up(0.0) > 0.0);
        assert_eq!(next_up(f32::INFINITY), f32::INFINITY);
    }

    #[test]
    fn test_procedural_meshes() {
        let cube = RawMesh::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.abs().max_element() <= 0.5 + 1e-6));

        let plane = RawMesh::plane(2.0, 2.0, 4);
        assert_eq!(plane.vertex_count(), 25);
        assert_eq!(plane.index_count(), 4 * 4 * 6);

        let sphere = RawMesh::sphere(8, 4);
        assert!(sphere.indices.iter().all(|&i| (i as usize) < sphere.vertex_count()));
    }
}
