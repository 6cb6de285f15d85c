use super::{Accelerator, TriangleMesh};
use crate::geometry::{HitRecord, Ray, TriangleHit, WorldBox};

/// Tests every triangle, reference answer for the accelerated queries.
#[derive(Copy, Clone, Debug)]
pub struct BruteForce<'a> {
    mesh: TriangleMesh<'a>,
}

impl<'a> BruteForce<'a> {
    pub fn new(mesh: TriangleMesh<'a>) -> BruteForce<'a> {
        BruteForce { mesh }
    }

    fn closest(&self, ray: &Ray) -> Option<(usize, TriangleHit)> {
        let mut best: Option<(usize, TriangleHit)> = None;
        for i in 0..self.mesh.triangle_count() {
            let t_max = best.map_or(ray.t_max, |(_, hit)| hit.t);
            if let Some(hit) = self.mesh.triangle(i).intersect(ray, t_max) {
                if best.is_none_or(|(_, best)| hit.t < best.t) {
                    best = Some((i, hit));
                }
            }
        }
        best
    }
}

impl Accelerator for BruteForce<'_> {
    fn intersect(&self, ray: &Ray) -> Option<HitRecord> {
        self.closest(ray)
            .map(|(i, hit)| self.mesh.hit_record(i, ray, &hit))
    }

    fn occluded(&self, ray: &Ray) -> bool {
        (0..self.mesh.triangle_count())
            .any(|i| self.mesh.triangle(i).intersect(ray, ray.t_max).is_some())
    }

    fn bounding_box(&self) -> WorldBox {
        self.mesh.bounding_box()
    }
}
