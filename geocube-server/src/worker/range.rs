use geocube_common::point::DataPoint;
use geocube_common::query::QueryPredicate;
use geocube_common::tree::RangeOp;
use std::collections::HashMap;

/// Splits a set of candidate leaves into the ones this worker owns and
/// the ones owned by each peer worker, per the externally-supplied
/// cube_id -> worker_id mapping.
pub fn partition_by_owner(
    leaves: &[usize],
    cube_owner: &HashMap<i32, String>,
    self_id: &str,
) -> (Vec<i32>, HashMap<String, Vec<i32>>) {
    let mut local = Vec::new();
    let mut remote: HashMap<String, Vec<i32>> = HashMap::new();
    for &leaf in leaves {
        let cube_id = leaf as i32;
        match cube_owner.get(&cube_id) {
            Some(owner) if owner != self_id => {
                remote.entry(owner.clone()).or_default().push(cube_id);
            }
            _ => local.push(cube_id),
        }
    }
    (local, remote)
}

/// Filters the merged candidate set from every owning worker down to
/// the points that actually satisfy the range predicate, reporting how
/// many candidates were over-drawn (whole leaves can contain points
/// outside the query box).
pub fn filter_matches(
    candidates: Vec<DataPoint>,
    dims: &[u32],
    vals: &[f64],
    ops: &[RangeOp],
) -> (Vec<DataPoint>, usize) {
    let predicate = QueryPredicate::range(dims.to_vec(), vals.to_vec(), ops.to_vec());
    let total = candidates.len();
    let matches: Vec<DataPoint> = candidates
        .into_iter()
        .filter(|p| predicate.check_point(p))
        .collect();
    let over_draw = total - matches.len();
    (matches, over_draw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_leaves_between_self_and_peers() {
        let mut owner = HashMap::new();
        owner.insert(1, "self".to_string());
        owner.insert(2, "peer-a".to_string());
        owner.insert(3, "peer-a".to_string());
        owner.insert(4, "peer-b".to_string());
        let (local, remote) = partition_by_owner(&[1, 2, 3, 4, 5], &owner, "self");
        assert_eq!(local, vec![1, 5]); // 5 unowned -> defaults local
        assert_eq!(remote["peer-a"], vec![2, 3]);
        assert_eq!(remote["peer-b"], vec![4]);
    }

    #[test]
    fn filters_out_of_range_candidates() {
        let candidates = vec![
            geocube_common::point::DataPoint::new(vec![1.0], vec![], vec![]),
            geocube_common::point::DataPoint::new(vec![9.0], vec![], vec![]),
        ];
        let (matches, over_draw) = filter_matches(candidates, &[0], &[5.0], &[-1]);
        assert_eq!(matches.len(), 1);
        assert_eq!(over_draw, 1);
    }
}
