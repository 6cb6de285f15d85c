use super::TriangleBvh;
use crate::{
    bvh::traversal::{self, MeshSlots, SlotHit, TraversalStats},
    geometry::{HitRecord, Ray, WorldBox},
    scene::Accelerator,
};

impl TriangleBvh<'_> {
    fn slots(&self) -> MeshSlots<'_, '_> {
        MeshSlots {
            mesh: &self.mesh,
            prim_indices: self.linear.prim_indices(),
        }
    }

    fn shade(&self, ray: &Ray, SlotHit { slot, hit }: SlotHit) -> HitRecord {
        let prim = self.linear.prim_indices()[slot].index();
        self.mesh.hit_record(prim, ray, &hit)
    }

    pub fn intersect_with_stats(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<HitRecord> {
        traversal::closest_hit_with_stats(&self.linear, &self.slots(), ray, stats)
            .map(|hit| self.shade(ray, hit))
    }

    pub fn occluded_with_stats(&self, ray: &Ray, stats: &mut TraversalStats) -> bool {
        traversal::any_hit_with_stats(&self.linear, &self.slots(), ray, stats)
    }
}

impl Accelerator for TriangleBvh<'_> {
    fn intersect(&self, ray: &Ray) -> Option<HitRecord> {
        self.intersect_with_stats(ray, &mut TraversalStats::default())
    }

    fn occluded(&self, ray: &Ray) -> bool {
        self.occluded_with_stats(ray, &mut TraversalStats::default())
    }

    fn bounding_box(&self) -> WorldBox {
        self.linear.bounding_box()
    }
}
