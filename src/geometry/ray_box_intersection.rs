use crate::geometry::{FloatType, Ray, WorldBox};

pub trait RayIntersectionExt {
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray) -> (FloatType, FloatType);

    /// True if the ray passes through the box somewhere in [ray.t_min, t_max]
    fn hit_within(&self, ray: &Ray, t_max: FloatType) -> bool {
        let (t1, t2) = self.intersect(ray);
        t1.max(ray.t_min) <= t2.min(t_max)
    }
}

impl RayIntersectionExt for WorldBox {
    /// Calculates ray intersection with the box.
    /// Returns minimum and maximum distance along the ray, ray intersects if min <= max.
    fn intersect(&self, ray: &Ray) -> (FloatType, FloatType) {
        let corners = [&self.min, &self.max];

        let mut min_t = FloatType::NEG_INFINITY;
        let mut max_t = FloatType::INFINITY;

        for axis in 0..3 {
            let sign = ray.sign[axis];
            let near = (corners[sign][axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let far = (corners[1 - sign][axis] - ray.origin[axis]) * ray.inv_direction[axis];

            // A slab distance is NaN if the ray starts on the slab plane and is parallel to it.
            // NaN fails both comparisons, so that slab doesn't restrict the range.
            if near > min_t {
                min_t = near;
            }
            if far < max_t {
                max_t = far;
            }
        }

        (min_t, max_t)
    }
}
