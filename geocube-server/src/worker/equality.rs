use crate::net::WorkerError;
use geocube_common::cache::Db;
use geocube_common::error::GeocubeError;
use geocube_common::point::DataPoint;
use geocube_common::query::QueryPredicate;
use geocube_common::tree::Tree;
use log::debug;

/// Exact-match query: `dims`/`vals` must cover every dim the tree was
/// built on, so the tree can resolve a single leaf.
pub fn equality_query(
    tree: &Tree,
    db: &mut Db,
    dims: &[u32],
    vals: &[f64],
) -> Result<Vec<DataPoint>, WorkerError> {
    for &d in tree.dims() {
        if !dims.contains(&d) {
            return Err(GeocubeError::DimensionMissing(d).into());
        }
    }

    let leaf = tree.equality_search(dims, vals)?;
    let cell = tree.map_ind_by_val(leaf, dims, vals)?;
    let candidates = db.read_single(leaf as i32, cell)?;

    let predicate = QueryPredicate::equality(dims.to_vec(), vals.to_vec());
    let matches: Vec<DataPoint> = candidates
        .iter()
        .filter(|p| predicate.check_point(p))
        .cloned()
        .collect();

    let conflicts = candidates.len() - matches.len();
    if conflicts > 0 {
        debug!("equality query on leaf {leaf} cell {cell}: {conflicts} conflicting candidates");
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocube_common::cache::CacheConfig;
    use geocube_common::point::DataPoint;

    fn make_tree_and_db() -> (Tree, Db, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = Tree::init(vec![0, 1], vec![4, 4], 0.9, vec![0.0, 0.0], vec![10.0, 10.0]).unwrap();
        let points = vec![
            DataPoint::new(vec![1.0, 1.0], vec![], vec!["a".into()]),
            DataPoint::new(vec![5.0, 5.0], vec![], vec!["b".into()]),
        ];
        tree.update(points).unwrap();
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
    fn finds_exact_match() {
        let (tree, mut db, _dir) = make_tree_and_db();
        let result = equality_query(&tree, &mut db, &[0, 1], &[1.0, 1.0]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].strings[0], "a");
    }

    #[test]
    fn no_match_returns_empty() {
        let (tree, mut db, _dir) = make_tree_and_db();
        let result = equality_query(&tree, &mut db, &[0, 1], &[9.9, 9.9]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn missing_dim_is_rejected() {
        let (tree, mut db, _dir) = make_tree_and_db();
        let err = equality_query(&tree, &mut db, &[0], &[1.0]).unwrap_err();
        assert!(matches!(err, WorkerError::Engine(GeocubeError::DimensionMissing(_))));
    }
}
