use crate::net::WorkerError;
use geocube_common::cache::Db;
use geocube_common::point::DataPoint;
use geocube_common::tree::Tree;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

const EXTENSION_RATIO: f64 = 1.0 + 1e-9;

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn extend(center: &[f64], boundary: &[f64]) -> Vec<f64> {
    center
        .iter()
        .zip(boundary.iter())
        .map(|(&c, &b)| c + (b - c) * EXTENSION_RATIO)
        .collect()
}

/// 9-digit-truncated coordinates, used to dedup boundary/corner points
/// so the same extension isn't queued twice (which would loop forever).
fn dedup_key(vals: &[f64]) -> Vec<i64> {
    vals.iter().map(|&v| (v * 1e9).trunc() as i64).collect()
}

struct Scored<T> {
    distance: f64,
    value: T,
}

impl<T> PartialEq for Scored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl<T> Eq for Scored<T> {}
impl<T> PartialOrd for Scored<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Scored<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we want the closest point on top
        other.distance.partial_cmp(&self.distance).unwrap_or(Ordering::Equal)
    }
}

/// k-nearest-neighbor search around `center` (already reordered to the
/// tree's dim order). Expands outward from the starting leaf by
/// stepping a hair past each discovered boundary point, reusing leaves
/// it has already resolved. Operates purely against the local tree +
/// cache: partitioning of cubes across workers does not affect which
/// points a single worker can see for its own cells.
pub fn knn_query(tree: &Tree, db: &mut Db, center: &[f64], k: usize) -> Result<Vec<DataPoint>, WorkerError> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let mut data_pq: BinaryHeap<Scored<DataPoint>> = BinaryHeap::new();
    let mut bnd_pq: BinaryHeap<Scored<Vec<f64>>> = BinaryHeap::new();
    let mut cached_leaves: Vec<usize> = Vec::new();
    let mut visited_cells: HashSet<(usize, usize)> = HashSet::new();
    let mut seen_boundary: HashSet<Vec<i64>> = HashSet::new();
    let mut output = Vec::with_capacity(k);
    let mut current_bound_distance = 0.0f64;

    let start_leaf = tree.equality_search(tree.dims(), center)?;
    cached_leaves.push(start_leaf);
    let mut extended = center.to_vec();

    loop {
        let extension_valid = tree.contains_global(&extended);
        if extension_valid {
            let leaf = match cached_leaves.iter().copied().find(|&l| tree.contains(l, &extended)) {
                Some(l) => l,
                None => {
                    let l = tree.equality_search(tree.dims(), &extended)?;
                    cached_leaves.push(l);
                    l
                }
            };

            let cell = tree.map_ind_by_val(leaf, tree.dims(), &extended)?;
            if visited_cells.insert((leaf, cell)) {
                for p in db.read_single(leaf as i32, cell)? {
                    let d = distance(center, &leaf_dim_vals(tree, &p));
                    data_pq.push(Scored { distance: d, value: p });
                }
                for corner in tree.corners(leaf) {
                    let key = dedup_key(&corner);
                    let d = distance(center, &corner);
                    if d > current_bound_distance && seen_boundary.insert(key) {
                        bnd_pq.push(Scored { distance: d, value: corner });
                    }
                }
                for face_point in tree.boundary_constrain(leaf, &extended) {
                    let key = dedup_key(&face_point);
                    let d = distance(center, &face_point);
                    if d > current_bound_distance && seen_boundary.insert(key) {
                        bnd_pq.push(Scored { distance: d, value: face_point });
                    }
                }
            }
        }

        let next_boundary = match bnd_pq.pop() {
            Some(b) => b,
            None => break,
        };

        while let Some(top) = data_pq.peek() {
            if top.distance >= next_boundary.distance {
                break;
            }
            let popped = data_pq.pop().unwrap();
            output.push(popped.value);
            if output.len() == k {
                return Ok(output);
            }
        }

        debug_assert!(next_boundary.distance >= current_bound_distance);
        current_bound_distance = next_boundary.distance;
        extended = extend(center, &next_boundary.value);
    }

    // boundary heap ran dry before reaching k — drain whatever remains,
    // closest first.
    while let Some(popped) = data_pq.pop() {
        output.push(popped.value);
        if output.len() == k {
            break;
        }
    }
    Ok(output)
}

fn leaf_dim_vals(tree: &Tree, point: &DataPoint) -> Vec<f64> {
    tree.dims().iter().map(|&d| point.float_val(d).unwrap()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocube_common::cache::CacheConfig;

    fn setup(points: Vec<(f64, f64)>) -> (Tree, Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = Tree::init(vec![0, 1], vec![4, 4], 0.9, vec![0.0, 0.0], vec![10.0, 10.0]).unwrap();
        let dps = points
            .into_iter()
            .map(|(x, y)| DataPoint::new(vec![x, y], vec![], vec![]))
            .collect();
        tree.update(dps).unwrap();
        let batches = tree.to_batches();
        let mut db = Db::new(CacheConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        for b in batches {
            db.feed(b).unwrap();
        }
        (tree, db, dir)
    }

    #[test]
    fn returns_k_closest_points() {
        let (tree, mut db, _dir) = setup(vec![(1.0, 1.0), (1.1, 1.1), (5.0, 5.0), (9.0, 9.0)]);
        let result = knn_query(&tree, &mut db, &[1.0, 1.0], 2).unwrap();
        assert_eq!(result.len(), 2);
        let mut xs: Vec<f64> = result.iter().map(|p| p.floats[0]).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![1.0, 1.1]);
    }

    #[test]
    fn k_larger_than_dataset_returns_everything() {
        let (tree, mut db, _dir) = setup(vec![(1.0, 1.0), (2.0, 2.0)]);
        let result = knn_query(&tree, &mut db, &[1.0, 1.0], 10).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn zero_k_returns_nothing() {
        let (tree, mut db, _dir) = setup(vec![(1.0, 1.0)]);
        let result = knn_query(&tree, &mut db, &[1.0, 1.0], 0).unwrap();
        assert!(result.is_empty());
    }
}
