use num_traits::One;
use std::ops::Sub;

use nalgebra::{ClosedAddAssign, ClosedDivAssign, Point, Scalar};

use super::{Axis, FloatType, WorldBox, WorldPoint};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<T: Scalar + ClosedAddAssign + ClosedDivAssign + One, const D: usize> AABB<Point<T, D>> {
    pub fn center(&self) -> Point<T, D> {
        let two = T::one() + T::one();
        let avg_coords = (&self.min.coords + &self.max.coords) / two;
        Point::from(avg_coords)
    }
}

// Componentwise min and max use f32::min/max, which return the non-NaN operand.
// A NaN coordinate therefore never spreads into a box, it only fails to extend it.
fn point_min(a: &WorldPoint, b: &WorldPoint) -> WorldPoint {
    a.coords.zip_map(&b.coords, FloatType::min).into()
}

fn point_max(a: &WorldPoint, b: &WorldPoint) -> WorldPoint {
    a.coords.zip_map(&b.coords, FloatType::max).into()
}

impl WorldBox {
    /// Box that contains nothing, identity for `union` and `grow`.
    pub fn empty() -> WorldBox {
        AABB {
            min: WorldPoint::from([FloatType::INFINITY; 3]),
            max: WorldPoint::from([FloatType::NEG_INFINITY; 3]),
        }
    }

    /// Bounding box of the points. Empty if there are no points or all of them are NaN.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a WorldPoint>) -> WorldBox {
        points.into_iter().fold(WorldBox::empty(), |mut acc, p| {
            acc.grow(p);
            acc
        })
    }

    /// True if min > max on any axis (including the `empty()` box).
    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| !(self.min[axis] <= self.max[axis]))
    }

    pub fn grow(&mut self, p: &WorldPoint) {
        self.min = point_min(&self.min, p);
        self.max = point_max(&self.max, p);
    }

    pub fn union(&self, other: &WorldBox) -> WorldBox {
        AABB {
            min: point_min(&self.min, &other.min),
            max: point_max(&self.max, &other.max),
        }
    }

    /// Overlap of two boxes. Disjoint boxes give an empty (inverted) box.
    pub fn intersection(&self, other: &WorldBox) -> WorldBox {
        AABB {
            min: point_max(&self.min, &other.min),
            max: point_min(&self.max, &other.max),
        }
    }

    pub fn extent(&self, axis: Axis) -> FloatType {
        self.max[axis] - self.min[axis]
    }

    /// Surface area of the box, zero for empty boxes.
    pub fn surface_area(&self) -> FloatType {
        if self.is_empty() {
            return 0.0;
        }
        let size = self.size();
        2.0 * (size.x * size.y + size.y * size.z + size.z * size.x)
    }

    /// Axis along which the box is the longest. Ties go to the lower axis.
    pub fn max_extent_axis(&self) -> Axis {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    /// True if the box has zero extent along every axis (or is empty).
    pub fn is_degenerate(&self) -> bool {
        self.is_empty() || (0..3).all(|axis| self.extent(axis) <= 0.0)
    }

    pub fn contains_box(&self, other: &WorldBox) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }
}
