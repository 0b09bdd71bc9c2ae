use crate::point::DataPoint;
use crate::tree::RangeOp;

/// A composable per-dim predicate, checked against a candidate point
/// after the tree/cache have narrowed things down to a cell or leaf.
/// `ops[i] == 0` means exact match, positive means lower bound
/// (`value >= threshold`), negative means upper bound (`value <=
/// threshold`).
#[derive(Clone, Debug)]
pub struct QueryPredicate {
    pub dims: Vec<u32>,
    pub vals: Vec<f64>,
    pub ops: Vec<RangeOp>,
}

impl QueryPredicate {
    pub fn equality(dims: Vec<u32>, vals: Vec<f64>) -> Self {
        let ops = vec![0; dims.len()];
        QueryPredicate { dims, vals, ops }
    }

    pub fn range(dims: Vec<u32>, vals: Vec<f64>, ops: Vec<RangeOp>) -> Self {
        QueryPredicate { dims, vals, ops }
    }

    pub fn check_point(&self, point: &DataPoint) -> bool {
        self.dims
            .iter()
            .zip(self.vals.iter())
            .zip(self.ops.iter())
            .all(|((&d, &v), &op)| match point.float_val(d) {
                Some(pv) => {
                    if op == 0 {
                        pv == v
                    } else if op > 0 {
                        pv >= v
                    } else {
                        pv <= v
                    }
                }
                None => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(vals: &[f64]) -> DataPoint {
        DataPoint::new(vals.to_vec(), vec![], vec![])
    }

    #[test]
    fn equality_requires_exact_match_on_every_dim() {
        let q = QueryPredicate::equality(vec![0, 1], vec![1.0, 2.0]);
        assert!(q.check_point(&point(&[1.0, 2.0])));
        assert!(!q.check_point(&point(&[1.0, 2.1])));
    }

    #[test]
    fn range_predicate_checks_bounds() {
        let q = QueryPredicate::range(vec![0, 0], vec![1.0, 5.0], vec![1, -1]);
        assert!(q.check_point(&point(&[3.0])));
        assert!(!q.check_point(&point(&[0.5])));
        assert!(!q.check_point(&point(&[6.0])));
    }

    #[test]
    fn missing_dim_never_matches() {
        let q = QueryPredicate::equality(vec![5], vec![1.0]);
        assert!(!q.check_point(&point(&[1.0])));
    }
}
