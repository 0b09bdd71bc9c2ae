pub mod split;

use crate::error::{GeocubeError, Result};
use crate::point::{DataBatch, DataPoint};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use split::{SplitHeuristic, SplitInput};
use std::collections::HashMap;

/// Sentinel for "no child" — valid because index 0 is always the root
/// and a node never points back to it.
const NO_CHILD: usize = 0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf { curr_num: u32 },
    Internal {
        split_dim: usize,
        split_val: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeNode {
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    pub cell_vals: Vec<f64>,
    pub capacity: u32,
    pub kind: NodeKind,
}

impl TreeNode {
    fn new(mins: Vec<f64>, maxs: Vec<f64>, d_caps: &[u32]) -> Self {
        let mut cell_vals = vec![0.0; mins.len()];
        let mut capacity = 1u32;
        for (i, &c) in d_caps.iter().enumerate() {
            cell_vals[i] = (maxs[i] - mins[i]) / c as f64;
            capacity *= c;
        }
        TreeNode {
            mins,
            maxs,
            cell_vals,
            capacity,
            kind: NodeKind::Leaf { curr_num: 0 },
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// Range-query comparator per tracked dim: 0 = equality-point,
/// positive = lower bound (value >= threshold), negative = upper bound
/// (value <= threshold).
pub type RangeOp = i32;

/// Persisted tree shape, written once at `init` time and read back on
/// every `serve` startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeConfig {
    pub dims: Vec<u32>,
    pub d_caps: Vec<u32>,
    pub split_ratio: f64,
    pub init_mins: Vec<f64>,
    pub init_maxs: Vec<f64>,
}

impl TreeConfig {
    pub fn build(&self) -> Result<Tree> {
        Tree::init(
            self.dims.clone(),
            self.d_caps.clone(),
            self.split_ratio,
            self.init_mins.clone(),
            self.init_maxs.clone(),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    node_data: Vec<Vec<DataPoint>>,
    dims: Vec<u32>,
    d_caps: Vec<u32>,
    capacity: u32,
    split_thres: u32,
    split_heuristic: SplitHeuristic,
}

impl Tree {
    pub fn init(
        dims: Vec<u32>,
        d_caps: Vec<u32>,
        split_ratio: f64,
        init_mins: Vec<f64>,
        init_maxs: Vec<f64>,
    ) -> Result<Self> {
        Self::init_with_heuristic(
            dims,
            d_caps,
            split_ratio,
            init_mins,
            init_maxs,
            SplitHeuristic::default(),
        )
    }

    pub fn init_with_heuristic(
        dims: Vec<u32>,
        d_caps: Vec<u32>,
        split_ratio: f64,
        init_mins: Vec<f64>,
        init_maxs: Vec<f64>,
        split_heuristic: SplitHeuristic,
    ) -> Result<Self> {
        if dims.is_empty() {
            return Err(GeocubeError::Config("dims must not be empty".into()));
        }
        if dims.len() != d_caps.len() || dims.len() != init_mins.len() || dims.len() != init_maxs.len()
        {
            return Err(GeocubeError::Config(
                "dims, d_caps, init_mins, init_maxs must have equal length".into(),
            ));
        }
        if d_caps.iter().any(|&c| c == 0) {
            return Err(GeocubeError::Config("d_caps entries must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&split_ratio) || split_ratio <= 0.0 {
            return Err(GeocubeError::Config(
                "split_ratio must be in (0, 1]".into(),
            ));
        }
        for i in 0..dims.len() {
            if init_mins[i] >= init_maxs[i] {
                return Err(GeocubeError::Config(format!(
                    "init_mins[{i}] must be < init_maxs[{i}]"
                )));
            }
        }

        let capacity: u32 = d_caps.iter().product();
        let split_thres = (capacity as f64 * split_ratio).floor() as u32;
        let root = TreeNode::new(init_mins, init_maxs, &d_caps);

        Ok(Tree {
            nodes: vec![root],
            node_data: vec![Vec::new()],
            dims,
            d_caps,
            capacity,
            split_thres,
            split_heuristic,
        })
    }

    pub fn dims(&self) -> &[u32] {
        &self.dims
    }

    pub fn leaf_bounds(&self, node_ind: usize) -> (&[f64], &[f64]) {
        (&self.nodes[node_ind].mins, &self.nodes[node_ind].maxs)
    }

    /// Whether `vals` (already in `self.dims()` order) falls within
    /// leaf `node_ind`'s bounding box.
    pub fn contains(&self, node_ind: usize, vals: &[f64]) -> bool {
        let node = &self.nodes[node_ind];
        (0..self.dims.len()).all(|i| vals[i] >= node.mins[i] && vals[i] <= node.maxs[i])
    }

    /// Whether `vals` falls within the root's bounding box, i.e. the
    /// tree's global extent.
    pub fn contains_global(&self, vals: &[f64]) -> bool {
        self.contains(0, vals)
    }

    pub fn leaf_count(&self, node_ind: usize) -> u32 {
        match self.nodes[node_ind].kind {
            NodeKind::Leaf { curr_num } => curr_num,
            NodeKind::Internal { .. } => 0,
        }
    }

    fn check_range(&self, point: &DataPoint) -> Result<()> {
        self.check_range_at(0, point)
    }

    fn check_range_at(&self, node_ind: usize, point: &DataPoint) -> Result<()> {
        let node = &self.nodes[node_ind];
        for (i, &d) in self.dims.iter().enumerate() {
            let v = point
                .float_val(d)
                .ok_or(GeocubeError::DimensionMissing(d))?;
            if v < node.mins[i] || v > node.maxs[i] {
                return Err(GeocubeError::OutOfRange {
                    dim: d,
                    value: v,
                    min: node.mins[i],
                    max: node.maxs[i],
                });
            }
        }
        Ok(())
    }

    fn check_range_by_val(&self, node_ind: usize, q_dims: &[u32], q_vals: &[f64]) -> Result<()> {
        let node = &self.nodes[node_ind];
        for (qi, &qd) in q_dims.iter().enumerate() {
            if let Some(i) = self.dims.iter().position(|&d| d == qd) {
                let v = q_vals[qi];
                if v < node.mins[i] || v > node.maxs[i] {
                    return Err(GeocubeError::OutOfRange {
                        dim: qd,
                        value: v,
                        min: node.mins[i],
                        max: node.maxs[i],
                    });
                }
            }
        }
        Ok(())
    }

    /// Discretized cell index of `point` within leaf `node_ind`'s grid.
    /// Also writes the result into `point.idx`, mirroring the tree's
    /// cache of a point's last-assigned cell.
    pub fn map_ind(&self, node_ind: usize, point: &mut DataPoint) -> usize {
        let node = &self.nodes[node_ind];
        let mut ind = 0usize;
        for (i, &d) in self.dims.iter().enumerate() {
            let v = point.float_val(d).unwrap_or(node.mins[i]);
            ind *= self.d_caps[i] as usize;
            ind += (((v - node.mins[i]) / node.cell_vals[i]).floor() as usize)
                .min(self.d_caps[i] as usize - 1);
        }
        point.idx = ind as i32;
        ind
    }

    pub fn map_ind_by_val(&self, node_ind: usize, q_dims: &[u32], q_vals: &[f64]) -> Result<usize> {
        let q_dict: HashMap<u32, f64> = q_dims.iter().copied().zip(q_vals.iter().copied()).collect();
        let node = &self.nodes[node_ind];
        let mut ind = 0usize;
        for (i, &d) in self.dims.iter().enumerate() {
            let v = *q_dict.get(&d).ok_or(GeocubeError::DimensionMissing(d))?;
            ind *= self.d_caps[i] as usize;
            ind += (((v - node.mins[i]) / node.cell_vals[i]).floor() as usize)
                .min(self.d_caps[i] as usize - 1);
        }
        Ok(ind)
    }

    /// All 2^|dims| corners of leaf `node_ind`'s bounding box, in the
    /// tree's dim order.
    pub fn corners(&self, node_ind: usize) -> Vec<Vec<f64>> {
        let node = &self.nodes[node_ind];
        let n = self.dims.len();
        let count = 1usize << n;
        let mut corners = Vec::with_capacity(count);
        for i in 0..count {
            let mut corner = vec![0.0; n];
            for k in 0..n {
                corner[k] = if (i >> k) & 1 == 0 {
                    node.mins[k]
                } else {
                    node.maxs[k]
                };
            }
            corners.push(corner);
        }
        corners
    }

    /// 2·|dims| points obtained by projecting `vals` onto each face of
    /// leaf `node_ind`'s bounding box.
    pub fn boundary_constrain(&self, node_ind: usize, vals: &[f64]) -> Vec<Vec<f64>> {
        let node = &self.nodes[node_ind];
        let mut points = Vec::with_capacity(2 * self.dims.len());
        for dim in 0..self.dims.len() {
            let mut lo = vals.to_vec();
            lo[dim] = node.mins[dim];
            points.push(lo);
            let mut hi = vals.to_vec();
            hi[dim] = node.maxs[dim];
            points.push(hi);
        }
        points
    }

    fn assign_data(&mut self, mut point: DataPoint, start: usize) -> Result<()> {
        if start == 0 {
            self.check_range(&point)?;
        }
        let mut curr = start;
        loop {
            match self.nodes[curr].kind {
                NodeKind::Leaf { .. } => break,
                NodeKind::Internal {
                    split_dim,
                    split_val,
                    left,
                    right,
                } => {
                    let d = self.dims[split_dim];
                    let v = point.float_val(d).unwrap();
                    curr = if v < split_val { left } else { right };
                }
            }
        }
        self.map_ind(curr, &mut point);
        self.node_data[curr].push(point);
        if let NodeKind::Leaf { curr_num } = &mut self.nodes[curr].kind {
            *curr_num += 1;
        }
        let overflowed = matches!(self.nodes[curr].kind, NodeKind::Leaf { curr_num } if curr_num >= self.split_thres);
        if overflowed {
            self.split_leaf(curr)?;
        }
        Ok(())
    }

    fn split_leaf(&mut self, node_ind: usize) -> Result<()> {
        let columns: Vec<Vec<f64>> = self
            .dims
            .iter()
            .map(|&d| {
                self.node_data[node_ind]
                    .iter()
                    .map(|p| p.float_val(d).unwrap())
                    .collect()
            })
            .collect();

        let choice = {
            let node = &self.nodes[node_ind];
            let input = SplitInput {
                columns: &columns,
                mins: &node.mins,
                maxs: &node.maxs,
                d_caps: &self.d_caps,
            };
            self.split_heuristic.choose(&input)
        };

        let node = &self.nodes[node_ind];
        let mut left_maxs = node.maxs.clone();
        left_maxs[choice.dim_index] = choice.split_val;
        let mut right_mins = node.mins.clone();
        right_mins[choice.dim_index] = choice.split_val;
        let left_mins = node.mins.clone();
        let right_maxs = node.maxs.clone();

        self.nodes.push(TreeNode::new(left_mins, left_maxs, &self.d_caps));
        self.node_data.push(Vec::new());
        let left_ind = self.nodes.len() - 1;

        self.nodes.push(TreeNode::new(right_mins, right_maxs, &self.d_caps));
        self.node_data.push(Vec::new());
        let right_ind = self.nodes.len() - 1;

        self.nodes[node_ind].kind = NodeKind::Internal {
            split_dim: choice.dim_index,
            split_val: choice.split_val,
            left: left_ind,
            right: right_ind,
        };

        let buffered = std::mem::take(&mut self.node_data[node_ind]);
        for p in buffered {
            self.assign_data(p, node_ind)?;
        }
        Ok(())
    }

    /// Assigns every point to a leaf, in a random permutation of input
    /// order — pre-sorted input would otherwise split unevenly.
    pub fn update(&mut self, points: Vec<DataPoint>) -> Result<()> {
        let mut order: Vec<usize> = (0..points.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        let mut points: Vec<Option<DataPoint>> = points.into_iter().map(Some).collect();
        for i in order {
            let p = points[i].take().unwrap();
            self.assign_data(p, 0)?;
        }
        Ok(())
    }

    /// Resolves a single leaf for an equality query. `q_dims`/`q_vals`
    /// must cover every dim the tree was built on.
    pub fn equality_search(&self, q_dims: &[u32], q_vals: &[f64]) -> Result<usize> {
        self.check_range_by_val(0, q_dims, q_vals)?;
        let q_dict: HashMap<u32, f64> = q_dims.iter().copied().zip(q_vals.iter().copied()).collect();

        let mut curr = 0usize;
        loop {
            match self.nodes[curr].kind {
                NodeKind::Leaf { .. } => return Ok(curr),
                NodeKind::Internal {
                    split_dim,
                    split_val,
                    left,
                    right,
                } => {
                    let d = self.dims[split_dim];
                    let v = *q_dict.get(&d).ok_or(GeocubeError::DimensionMissing(d))?;
                    curr = if v < split_val { left } else { right };
                }
            }
        }
    }

    /// Collects every leaf whose box can satisfy the per-dim range
    /// predicates (`q_ops`: 0 = equality-point, >0 = lower bound,
    /// <0 = upper bound).
    pub fn range_search(&self, q_dims: &[u32], q_vals: &[f64], q_ops: &[RangeOp]) -> Result<Vec<usize>> {
        if q_dims.len() != q_vals.len() || q_dims.len() != q_ops.len() {
            return Err(GeocubeError::Config(
                "q_dims, q_vals, q_ops must have equal length".into(),
            ));
        }
        // only predicates on tree-tracked dims can prune; translate once
        let mut preds: Vec<(usize, f64, RangeOp)> = Vec::new();
        for (i, &qd) in q_dims.iter().enumerate() {
            if let Some(pos) = self.dims.iter().position(|&d| d == qd) {
                preds.push((pos, q_vals[i], q_ops[i]));
            }
        }

        let mut out = Vec::new();
        let mut stack = vec![0usize];
        while let Some(node_ind) = stack.pop() {
            let node = &self.nodes[node_ind];
            let satisfiable = preds.iter().all(|&(dim, v, op)| {
                if op == 0 {
                    v >= node.mins[dim] && v <= node.maxs[dim]
                } else if op > 0 {
                    node.maxs[dim] >= v
                } else {
                    node.mins[dim] <= v
                }
            });
            if !satisfiable {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { .. } => out.push(node_ind),
                NodeKind::Internal { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        Ok(out)
    }

    /// Drains every leaf's buffered points into one batch each.
    pub fn to_batches(&mut self) -> Vec<DataBatch> {
        let mut batches = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if let NodeKind::Leaf { .. } = node.kind {
                let points = std::mem::take(&mut self.node_data[i]);
                batches.push(DataBatch {
                    cube_id: i as i32,
                    capacity: node.capacity,
                    dims: self.dims.clone(),
                    mins: node.mins.clone(),
                    maxs: node.maxs.clone(),
                    points,
                });
            }
        }
        batches
    }

    pub fn leaf_ids(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| GeocubeError::Config(e.to_string()))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| GeocubeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(vals: &[f64]) -> DataPoint {
        DataPoint::new(vals.to_vec(), vec![], vec![])
    }

    fn small_tree(split_ratio: f64) -> Tree {
        Tree::init(
            vec![0, 1],
            vec![4, 4],
            split_ratio,
            vec![0.0, 0.0],
            vec![10.0, 10.0],
        )
        .unwrap()
    }

    #[test]
    fn init_rejects_bad_config() {
        assert!(Tree::init(vec![], vec![], 0.5, vec![], vec![]).is_err());
        assert!(Tree::init(vec![0], vec![0], 0.5, vec![0.0], vec![1.0]).is_err());
        assert!(Tree::init(vec![0], vec![4], 0.5, vec![1.0], vec![0.0]).is_err());
    }

    #[test]
    fn single_point_assigns_to_root_leaf() {
        let mut tree = small_tree(0.9);
        tree.update(vec![point(&[1.0, 1.0])]).unwrap();
        assert_eq!(tree.leaf_ids(), vec![0]);
        assert_eq!(tree.leaf_count(0), 1);
    }

    #[test]
    fn out_of_range_point_is_rejected() {
        let mut tree = small_tree(0.9);
        let err = tree.update(vec![point(&[100.0, 1.0])]).unwrap_err();
        assert!(matches!(err, GeocubeError::OutOfRange { .. }));
    }

    #[test]
    fn split_preserves_point_count() {
        // capacity = 16, split_ratio 0.2 -> split_thres = floor(16*0.2) = 3
        let mut tree = small_tree(0.2);
        let points = vec![
            point(&[1.0, 1.0]),
            point(&[2.0, 2.0]),
            point(&[9.0, 9.0]),
            point(&[8.0, 8.0]),
            point(&[1.5, 1.5]),
        ];
        tree.update(points).unwrap();
        let leaves = tree.leaf_ids();
        assert!(leaves.len() >= 2);
        let total: u32 = leaves.iter().map(|&l| tree.leaf_count(l)).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn equality_search_finds_containing_leaf() {
        let mut tree = small_tree(0.2);
        tree.update(vec![
            point(&[1.0, 1.0]),
            point(&[2.0, 2.0]),
            point(&[9.0, 9.0]),
        ])
        .unwrap();
        let leaf = tree.equality_search(&[0, 1], &[1.0, 1.0]).unwrap();
        let (mins, maxs) = tree.leaf_bounds(leaf);
        assert!(1.0 >= mins[0] && 1.0 <= maxs[0]);
        assert!(1.0 >= mins[1] && 1.0 <= maxs[1]);
    }

    #[test]
    fn range_search_returns_every_overlapping_leaf() {
        let mut tree = small_tree(0.2);
        tree.update(vec![
            point(&[1.0, 1.0]),
            point(&[2.0, 2.0]),
            point(&[9.0, 9.0]),
            point(&[8.0, 8.0]),
            point(&[1.5, 1.5]),
        ])
        .unwrap();
        // whole-box range query (op=+1 lower bound 0, op=-1 upper bound 10) must hit every leaf
        let leaves = tree
            .range_search(&[0, 0, 1, 1], &[0.0, 10.0, 0.0, 10.0], &[1, -1, 1, -1])
            .unwrap();
        assert_eq!(leaves.len(), tree.leaf_ids().len());
    }

    #[test]
    fn serialize_round_trips() {
        let mut tree = small_tree(0.2);
        tree.update(vec![point(&[1.0, 1.0]), point(&[9.0, 9.0])])
            .unwrap();
        let bytes = tree.serialize().unwrap();
        let restored = Tree::deserialize(&bytes).unwrap();
        assert_eq!(restored.leaf_ids().len(), tree.leaf_ids().len());
    }

    #[test]
    fn corners_has_two_pow_dims_entries() {
        let tree = small_tree(0.9);
        assert_eq!(tree.corners(0).len(), 4);
    }

    #[test]
    fn boundary_constrain_has_two_per_dim() {
        let tree = small_tree(0.9);
        assert_eq!(tree.boundary_constrain(0, &[5.0, 5.0]).len(), 4);
    }
}
