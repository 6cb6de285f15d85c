mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

use nalgebra::{Point2, Point3, Unit, Vector3};

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use ray_triangle_intersection::TriangleHit;
pub use triangle::{BarycentricCoordinates, Triangle};

pub type FloatType = f32;
pub const EPSILON: FloatType = 1e-6;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type TexturePoint = Point2<FloatType>;

/// Index of a coordinate axis, 0 = x, 1 = y, 2 = z.
pub type Axis = usize;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Normalized direction of the ray
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,

    /// 1 where the inverse direction is negative, selects which box corner is the near slab
    pub sign: [usize; 3],

    pub t_min: FloatType,
    pub t_max: FloatType,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        Self::with_range(origin, direction, 0.0, FloatType::INFINITY)
    }

    pub fn with_range(
        origin: WorldPoint,
        direction: WorldVector,
        t_min: FloatType,
        t_max: FloatType,
    ) -> Ray {
        assert2::debug_assert!(direction.norm_squared() > 0.0);
        let direction = direction.normalize();
        let inv_direction = direction.map(|x| if x == 0.0 { f32::INFINITY } else { 1.0 / x });
        let sign = [0, 1, 2].map(|axis| usize::from(inv_direction[axis] < 0.0));

        Ray {
            origin,
            direction,
            inv_direction,
            sign,
            t_min,
            t_max,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }
}

/// Full intersection record of a closest-hit query.
#[derive(Clone, Debug)]
pub struct HitRecord {
    /// Distance along the ray
    pub t: FloatType,
    pub point: WorldPoint,
    /// Shading normal, interpolated from vertex normals if the mesh has them
    pub normal: Unit<WorldVector>,
    pub tangent: Unit<WorldVector>,
    pub bitangent: Unit<WorldVector>,
    pub texture_coords: TexturePoint,
    pub barycentric: BarycentricCoordinates<FloatType>,
    pub material: u32,
    /// Index of the triangle in the input mesh
    pub primitive: usize,
}

/// Builds an orthonormal tangent frame around a unit normal.
/// Duff et al., "Building an Orthonormal Basis, Revisited" (2017)
pub fn tangent_frame(normal: &Unit<WorldVector>) -> (Unit<WorldVector>, Unit<WorldVector>) {
    let n = normal.as_ref();
    let sign = FloatType::copysign(1.0, n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let tangent = WorldVector::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = WorldVector::new(b, sign + n.y * n.y * a, -n.y);
    (
        Unit::new_unchecked(tangent),
        Unit::new_unchecked(bitangent),
    )
}
