use super::{BarycentricCoordinates, FloatType, Ray, Triangle, WorldPoint};

/// Result of a single ray-triangle test.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TriangleHit {
    pub t: FloatType,
    pub uv: BarycentricCoordinates<FloatType>,
}

impl Triangle<WorldPoint> {
    /// Calculates ray intersection with the (two sided) triangle.
    /// Returns distance along ray and barycentric uv coordinates, if the hit lies within
    /// [ray.t_min, t_max].
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect(&self, ray: &Ray, t_max: FloatType) -> Option<TriangleHit> {
        let [e1, e2] = self.edges();

        let ray_cross_e2 = ray.direction.cross(&e2);
        let det = e1.dot(&ray_cross_e2);

        // Ray parallel to the triangle plane, or a degenerate triangle
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = ray.origin - self[0];
        let u = inv_det * s.dot(&ray_cross_e2);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * ray.direction.dot(&s_cross_e1);
        if !(v >= 0.0 && u + v <= 1.0) {
            return None;
        }

        let t = inv_det * e2.dot(&s_cross_e1);
        if t >= ray.t_min && t <= t_max {
            Some(TriangleHit {
                t,
                uv: BarycentricCoordinates { u, v },
            })
        } else {
            None
        }
    }
}
