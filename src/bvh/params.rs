use bon::bon;
use thiserror::Error;

use super::sah::SahCosts;
use crate::geometry::FloatType;

pub const MIN_BIN_COUNT: usize = 2;
pub const MAX_BIN_COUNT: usize = 64;

const DEFAULT_MAX_LEAF_PRIMS: usize = 4;
const DEFAULT_TRAVERSAL_COST: FloatType = 1.0;
const DEFAULT_INTERSECTION_COST: FloatType = 1.0;
const DEFAULT_BIN_COUNT: usize = 16;
const DEFAULT_SPATIAL_SPLIT_ALPHA: FloatType = 1e-5;

/// Tuning knobs shared by all builders.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildParams {
    /// Ranges above this size are always split.
    /// Ranges at or below it become leaves unless splitting is strictly cheaper.
    pub max_leaf_prims: usize,
    /// SAH cost of visiting an inner node
    pub traversal_cost: FloatType,
    /// SAH cost of one ray-triangle test
    pub intersection_cost: FloatType,
    /// Number of bins for binned SAH evaluation, 2..=64
    pub bin_count: usize,
    /// Spatial splits are only tried when the object split's child overlap,
    /// relative to the root surface area, exceeds this.
    pub spatial_split_alpha: FloatType,
}

#[bon]
impl BuildParams {
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_LEAF_PRIMS)] max_leaf_prims: usize,
        #[builder(default = DEFAULT_TRAVERSAL_COST)] traversal_cost: FloatType,
        #[builder(default = DEFAULT_INTERSECTION_COST)] intersection_cost: FloatType,
        #[builder(default = DEFAULT_BIN_COUNT)] bin_count: usize,
        #[builder(default = DEFAULT_SPATIAL_SPLIT_ALPHA)] spatial_split_alpha: FloatType,
    ) -> Result<BuildParams, ParamsError> {
        let params = BuildParams {
            max_leaf_prims,
            traversal_cost,
            intersection_cost,
            bin_count,
            spatial_split_alpha,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.max_leaf_prims == 0 {
            return Err(ParamsError::MaxLeafPrims);
        }
        if !(MIN_BIN_COUNT..=MAX_BIN_COUNT).contains(&self.bin_count) {
            return Err(ParamsError::BinCount(self.bin_count));
        }
        for (name, value) in [
            ("traversal_cost", self.traversal_cost),
            ("intersection_cost", self.intersection_cost),
            ("spatial_split_alpha", self.spatial_split_alpha),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ParamsError::InvalidValue { name, value });
            }
        }
        Ok(())
    }

    pub fn sah_costs(&self) -> SahCosts {
        SahCosts {
            traversal: self.traversal_cost,
            intersection: self.intersection_cost,
        }
    }
}

impl Default for BuildParams {
    fn default() -> Self {
        BuildParams {
            max_leaf_prims: DEFAULT_MAX_LEAF_PRIMS,
            traversal_cost: DEFAULT_TRAVERSAL_COST,
            intersection_cost: DEFAULT_INTERSECTION_COST,
            bin_count: DEFAULT_BIN_COUNT,
            spatial_split_alpha: DEFAULT_SPATIAL_SPLIT_ALPHA,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("max_leaf_prims must be at least 1")]
    MaxLeafPrims,

    #[error("bin_count must be in {MIN_BIN_COUNT}..={MAX_BIN_COUNT}, got {0}")]
    BinCount(usize),

    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidValue { name: &'static str, value: FloatType },
}
