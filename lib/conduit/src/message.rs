use crate::key::Key;
use crate::support::WorkerAddr;
use hashbrown::HashMap;
use indexmap::IndexSet;
use serde_derive::{Deserialize, Serialize};

pub type ClientId = String;

/// Encoded task shipped inside an `update-graph`. The function and argument
/// bytes are produced by the driver's pluggable codec and are opaque to the
/// wire layer; literal graph nodes travel as raw data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaskPayload {
    Call {
        function: Vec<u8>,
        args: Option<Vec<u8>>,
        kwargs: Option<Vec<u8>>,
    },
    Data(Vec<u8>),
}

/// Messages travelling driver -> scheduler on the event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DriverMessage {
    RegisterClient {
        client: ClientId,
    },
    UpdateGraph {
        tasks: HashMap<Key, TaskPayload>,
        dependencies: HashMap<Key, IndexSet<Key>>,
        keys: Vec<Key>,
        restrictions: HashMap<Key, Vec<WorkerAddr>>,
        loose_restrictions: IndexSet<Key>,
        client: ClientId,
    },
    ClientReleasesKeys {
        keys: Vec<Key>,
        client: ClientId,
    },
    MissingData {
        missing: Vec<Key>,
    },
    Restart,
    CloseStream,
    Close,
}

/// Messages travelling scheduler -> driver on the event stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SchedulerMessage {
    StreamStart,
    KeyInMemory {
        key: Key,
        type_name: Option<String>,
    },
    LostData {
        key: Key,
    },
    CancelledKey {
        key: Key,
    },
    TaskErred {
        key: Key,
        exception: String,
        traceback: Option<String>,
    },
    Restart,
    SchedulerError {
        exception: String,
    },
    Close,
}

/// Data pushed into cluster memory by a scatter call. Sequence input lets the
/// scheduler assign keys; named input binds each element to the given name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScatterPayload {
    Seq(Vec<Vec<u8>>),
    Named(Vec<(String, Vec<u8>)>),
}

/// Request broadcast to every worker through the center.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkerRequest {
    UploadFile { filename: String, data: Vec<u8> },
}

/// Per-worker reply to a broadcast: the received byte count on success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkerReply {
    ByteCount(u64),
    Error(String),
}

/// Request/response calls made outside the event stream, one connection per
/// call in the networked mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    Identity,
    Gather {
        keys: Vec<Key>,
    },
    Scatter {
        data: ScatterPayload,
        workers: Option<Vec<WorkerAddr>>,
        client: ClientId,
        broadcast: bool,
    },
    Cancel {
        keys: Vec<Key>,
        client: ClientId,
    },
    Ncores,
    Broadcast {
        msg: WorkerRequest,
    },
}

/// Payloads for a gather: either every requested key, or the subset the
/// scheduler could not find.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GatherReply {
    Data(HashMap<Key, Vec<u8>>),
    Missing(Vec<Key>),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PeerKind {
    Scheduler,
    Center,
    Other(String),
}

/// Answer to the `identity` RPC used to discover what the remote endpoint is.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub kind: PeerKind,
    pub center: Option<WorkerAddr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Identity(PeerIdentity),
    Gather(GatherReply),
    Scatter { keys: Vec<Key> },
    Cancelled,
    Ncores { cores: HashMap<WorkerAddr, usize> },
    Broadcast { replies: Vec<(WorkerAddr, WorkerReply)> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_graph() -> DriverMessage {
        let key = Key::token("inc-1f3a");
        let mut tasks = HashMap::new();
        tasks.insert(
            key.clone(),
            TaskPayload::Call {
                function: vec![1, 2, 3],
                args: Some(vec![4, 5]),
                kwargs: None,
            },
        );

        let mut dependencies = HashMap::new();
        dependencies.insert(key.clone(), IndexSet::new());

        DriverMessage::UpdateGraph {
            tasks,
            dependencies,
            keys: vec![key],
            restrictions: HashMap::new(),
            loose_restrictions: IndexSet::new(),
            client: "client-1".to_string(),
        }
    }

    #[test]
    fn test_driver_message_codec_roundtrip() {
        let msg = update_graph();
        let bytes = bincode::serialize(&msg).unwrap();
        let back: DriverMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_scheduler_message_codec_roundtrip() {
        let msg = SchedulerMessage::TaskErred {
            key: Key::token("div-9c"),
            exception: "division by zero".to_string(),
            traceback: Some("worker.rs:42".to_string()),
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let back: SchedulerMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, msg);
    }
}
