pub mod equality;
pub mod knn;
pub mod range;

use crate::messages::{Message, QueryRequest, RequestId};
use crate::net::WorkerError;
use geocube_common::cache::Db;
use geocube_common::point::DataPoint;
use geocube_common::tree::Tree;
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

/// Sends a message to a named peer worker. The actual transport (TCP,
/// in-process channel, whatever) is someone else's problem; `Worker`
/// only needs "fire this at that peer".
pub trait PeerSender: Send + Sync {
    fn send(&self, peer_id: &str, msg: Message) -> Result<(), WorkerError>;
}

/// Holds no shared mutable state outside of this struct — every piece
/// of what used to be a process-wide singleton lives here instead, and
/// gets passed explicitly to whatever needs it.
pub struct Worker {
    worker_id: String,
    tree: RwLock<Option<Tree>>,
    db: Mutex<Db>,
    cube_owner: RwLock<HashMap<i32, String>>,
    peers: std::sync::Mutex<HashMap<RequestId, oneshot::Sender<Vec<DataPoint>>>>,
    next_request_id: AtomicU64,
    peer_sender: Arc<dyn PeerSender>,
    peer_timeout: Duration,
}

struct NullPeerSender;
impl PeerSender for NullPeerSender {
    fn send(&self, peer_id: &str, _msg: Message) -> Result<(), WorkerError> {
        Err(WorkerError::UnknownPeer(peer_id.to_string()))
    }
}

impl Worker {
    pub fn new(worker_id: String, db: Db) -> Self {
        Worker {
            worker_id,
            tree: RwLock::new(None),
            db: Mutex::new(db),
            cube_owner: RwLock::new(HashMap::new()),
            peers: std::sync::Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            peer_sender: Arc::new(NullPeerSender),
            peer_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_peer_sender(mut self, peer_sender: Arc<dyn PeerSender>) -> Self {
        self.peer_sender = peer_sender;
        self
    }

    pub fn set_cube_owners(&self, owners: HashMap<i32, String>) {
        *self.cube_owner.write().unwrap() = owners;
    }

    pub fn install_tree(&self, tree: Tree) {
        *self.tree.write().unwrap() = Some(tree);
    }

    fn next_request_id(&self) -> RequestId {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Single dispatch point between the transport and the engine. See
    /// the message variants in [`crate::messages`] for what each does.
    pub async fn handle_message(&self, msg: Message) -> Result<Option<Message>, WorkerError> {
        match msg {
            Message::Tree { bytes } => {
                let tree = Tree::deserialize(&bytes)?;
                *self.tree.write().unwrap() = Some(tree);
                Ok(None)
            }
            Message::DataBatch(batch) => {
                self.db.lock().await.feed(batch)?;
                Ok(None)
            }
            Message::Query(q) => {
                let points = self.run_query(q).await?;
                Ok(Some(Message::DataPoints {
                    request_id: None,
                    points,
                }))
            }
            Message::DataPoints { request_id: Some(rid), points } => {
                if let Some(tx) = self.peers.lock().unwrap().remove(&rid) {
                    let _ = tx.send(points);
                } else {
                    warn!("received DataPoints for unknown request id {rid}");
                }
                Ok(None)
            }
            Message::DataPoints { request_id: None, .. } => Ok(None),
            Message::Error { message } => {
                warn!("peer reported error: {message}");
                Ok(None)
            }
            Message::PeerRequestAll { request_id, sender_id, cube_indices } => {
                let mut points = Vec::new();
                let mut db = self.db.lock().await;
                for cube_id in cube_indices {
                    points.extend(db.read_all(cube_id)?);
                }
                drop(db);
                self.peer_sender.send(
                    &sender_id,
                    Message::DataPoints {
                        request_id: Some(request_id),
                        points,
                    },
                )?;
                Ok(None)
            }
            Message::Hello { .. } => Err(WorkerError::Protocol("unexpected Hello message".into())),
            Message::PeerRequestBatch { request_id, sender_id, cube_indices, cell_indices } => {
                let mut points = Vec::new();
                let mut db = self.db.lock().await;
                for cube_id in cube_indices {
                    points.extend(db.read_batch(cube_id, &cell_indices)?);
                }
                drop(db);
                self.peer_sender.send(
                    &sender_id,
                    Message::DataPoints {
                        request_id: Some(request_id),
                        points,
                    },
                )?;
                Ok(None)
            }
        }
    }

    async fn run_query(&self, query: QueryRequest) -> Result<Vec<DataPoint>, WorkerError> {
        match query {
            QueryRequest::Equality { dims, vals } => {
                let mut db = self.db.lock().await;
                let tree_guard = self.tree.read().unwrap();
                let tree = tree_guard.as_ref().ok_or(WorkerError::NoTree)?;
                equality::equality_query(tree, &mut db, &dims, &vals)
            }
            QueryRequest::Range { dims, vals, ops } => self.range_query(&dims, &vals, &ops).await,
            QueryRequest::Knn { dims, vals, k } => {
                let mut db = self.db.lock().await;
                let tree_guard = self.tree.read().unwrap();
                let tree = tree_guard.as_ref().ok_or(WorkerError::NoTree)?;
                let ordered = reorder_to_tree_dims(tree, &dims, &vals)?;
                knn::knn_query(tree, &mut db, &ordered, k)
            }
        }
    }

    async fn range_query(&self, dims: &[u32], vals: &[f64], ops: &[i32]) -> Result<Vec<DataPoint>, WorkerError> {
        let leaves = {
            let tree_guard = self.tree.read().unwrap();
            let tree = tree_guard.as_ref().ok_or(WorkerError::NoTree)?;
            tree.range_search(dims, vals, ops)?
        };

        let (local, remote) = {
            let owner = self.cube_owner.read().unwrap();
            range::partition_by_owner(&leaves, &owner, &self.worker_id)
        };

        let mut candidates = Vec::new();
        {
            let mut db = self.db.lock().await;
            for cube_id in local {
                candidates.extend(db.read_all(cube_id)?);
            }
        }

        for (peer_id, cube_indices) in remote {
            let request_id = self.next_request_id();
            let (tx, rx) = oneshot::channel();
            self.peers.lock().unwrap().insert(request_id, tx);
            if let Err(e) = self.peer_sender.send(
                &peer_id,
                Message::PeerRequestAll {
                    request_id,
                    sender_id: self.worker_id.clone(),
                    cube_indices,
                },
            ) {
                self.peers.lock().unwrap().remove(&request_id);
                return Err(e);
            }
            match tokio::time::timeout(self.peer_timeout, rx).await {
                Ok(Ok(points)) => candidates.extend(points),
                Ok(Err(_)) => return Err(WorkerError::Protocol(format!("peer {peer_id} dropped the response channel"))),
                Err(_) => {
                    self.peers.lock().unwrap().remove(&request_id);
                    return Err(WorkerError::Protocol(format!("peer {peer_id} timed out")));
                }
            }
        }

        let (matches, over_draw) = range::filter_matches(candidates, dims, vals, ops);
        if over_draw > 0 {
            log::debug!("range query over-drew {over_draw} candidates that fell outside the box");
        }
        Ok(matches)
    }
}

fn reorder_to_tree_dims(tree: &Tree, dims: &[u32], vals: &[f64]) -> Result<Vec<f64>, WorkerError> {
    use geocube_common::error::GeocubeError;
    let dict: HashMap<u32, f64> = dims.iter().copied().zip(vals.iter().copied()).collect();
    tree.dims()
        .iter()
        .map(|d| dict.get(d).copied().ok_or(GeocubeError::DimensionMissing(*d).into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geocube_common::cache::CacheConfig;
    use geocube_common::point::DataPoint;

    async fn worker_with_points(points: Vec<(f64, f64)>) -> (Worker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = Tree::init(vec![0, 1], vec![4, 4], 0.9, vec![0.0, 0.0], vec![10.0, 10.0]).unwrap();
        let dps = points
            .into_iter()
            .map(|(x, y)| DataPoint::new(vec![x, y], vec![], vec![]))
            .collect();
        tree.update(dps).unwrap();
        let batches = tree.to_batches();
        let tree_bytes = tree.serialize().unwrap();

        let db = Db::new(CacheConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        let worker = Worker::new("w1".to_string(), db);
        worker.handle_message(Message::Tree { bytes: tree_bytes }).await.unwrap();
        for b in batches {
            worker.handle_message(Message::DataBatch(b)).await.unwrap();
        }
        (worker, dir)
    }

    #[tokio::test]
    async fn equality_query_via_message_dispatch() {
        let (worker, _dir) = worker_with_points(vec![(1.0, 1.0), (5.0, 5.0)]).await;
        let reply = worker
            .handle_message(Message::Query(QueryRequest::Equality {
                dims: vec![0, 1],
                vals: vec![1.0, 1.0],
            }))
            .await
            .unwrap();
        match reply {
            Some(Message::DataPoints { points, .. }) => assert_eq!(points.len(), 1),
            _ => panic!("expected DataPoints reply"),
        }
    }

    #[tokio::test]
    async fn query_without_tree_fails_cleanly() {
        let db = Db::new(CacheConfig::default());
        let worker = Worker::new("w1".to_string(), db);
        let err = worker
            .handle_message(Message::Query(QueryRequest::Equality {
                dims: vec![0],
                vals: vec![1.0],
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::NoTree));
    }
}
