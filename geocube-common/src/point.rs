use serde::{Deserialize, Serialize};

/// A record with three parallel attribute sequences. Floats occupy the
/// first `floats.len()` dimension indices, ints follow, then strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub floats: Vec<f64>,
    pub ints: Vec<i32>,
    pub strings: Vec<String>,

    /// Cache of this point's cell index within its current leaf's grid.
    /// Recomputed every time the point is assigned to a leaf; not part of
    /// the point's logical identity.
    #[serde(default)]
    pub idx: i32,
}

impl DataPoint {
    pub fn new(floats: Vec<f64>, ints: Vec<i32>, strings: Vec<String>) -> Self {
        DataPoint {
            floats,
            ints,
            strings,
            idx: 0,
        }
    }

    pub fn dim_count(&self) -> usize {
        self.floats.len() + self.ints.len() + self.strings.len()
    }

    /// Reads the value of a flattened dimension index as f64. Only
    /// float and int dimensions are addressable this way; string
    /// dimensions have no numeric value and are not used by the tree.
    pub fn float_val(&self, dim: u32) -> Option<f64> {
        let dim = dim as usize;
        if dim < self.floats.len() {
            Some(self.floats[dim])
        } else if dim < self.floats.len() + self.ints.len() {
            Some(self.ints[dim - self.floats.len()] as f64)
        } else {
            None
        }
    }
}

/// All points belonging to one leaf, ready to be fed into a metacube.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataBatch {
    pub cube_id: i32,
    pub capacity: u32,
    pub dims: Vec<u32>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    pub points: Vec<DataPoint>,
}
