//! Tagged union transported between a client and a worker, and between
//! peer workers during range-query aggregation. The transport (see
//! [`crate::net::protocol`]) only moves these values; it assigns no
//! meaning to them itself.

use geocube_common::point::{DataBatch, DataPoint};
use geocube_common::tree::RangeOp;
use serde::{Deserialize, Serialize};

/// Correlates a fanned-out peer request with its eventual response, so
/// a worker juggling several in-flight range queries can tell which
/// [`Message::DataPoints`] answers which [`Message::PeerRequestAll`].
pub type RequestId = u64;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum QueryRequest {
    Equality {
        dims: Vec<u32>,
        vals: Vec<f64>,
    },
    Range {
        dims: Vec<u32>,
        vals: Vec<f64>,
        ops: Vec<RangeOp>,
    },
    Knn {
        dims: Vec<u32>,
        vals: Vec<f64>,
        k: usize,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// First message exchanged by both sides of a connection, right
    /// after the magic-number handshake.
    Hello { protocol_version: u32 },

    /// Installs (or replaces) the read-only tree shared by every query.
    Tree { bytes: Vec<u8> },

    /// One leaf's worth of points, to be fed into the cache.
    DataBatch(DataBatch),

    /// A query to run against the locally installed tree + cache.
    Query(QueryRequest),

    /// Points returned by a query or by a peer in response to a
    /// [`Message::PeerRequestAll`] / [`Message::PeerRequestBatch`].
    DataPoints {
        request_id: Option<RequestId>,
        points: Vec<DataPoint>,
    },

    Error { message: String },

    /// Sent to a peer worker that owns some of a range query's leaves:
    /// "send me every point in these cubes".
    PeerRequestAll {
        request_id: RequestId,
        sender_id: String,
        cube_indices: Vec<i32>,
    },

    /// As [`Message::PeerRequestAll`], but scoped to specific cells
    /// within each cube (used by KNN boundary expansion).
    PeerRequestBatch {
        request_id: RequestId,
        sender_id: String,
        cube_indices: Vec<i32>,
        cell_indices: Vec<usize>,
    },
}
