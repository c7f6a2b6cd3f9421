//! Wire messages for the distributed context protocol.
//!
//! Every request carries its `context_id` as the correlation key. The
//! transport is out of scope: these types serialize with serde and assume
//! reliable, ordered delivery per context. [`Request`] and [`Response`]
//! are the envelope a transport would frame.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Identifies a remote object. Equality is structural: two ids name the
/// same object iff all three fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteObjectIdProto {
    /// Disambiguates the owning host / allocation epoch.
    pub prefix_id: u64,
    /// Per-host monotonically assigned handle.
    pub local_id: u64,
    /// Name of the owning device.
    pub device: String,
}

/// One job in the cluster: a name and its task addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, e.g. `"worker"`.
    pub name: String,
    /// Task addresses, indexed by task number.
    pub tasks: Vec<String>,
}

/// Job/task topology of a distributed session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// The jobs making up the cluster.
    pub jobs: Vec<JobConfig>,
}

/// Creates a context. A duplicate create for a live id is an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContextRequest {
    /// Session key, supplied by the creator.
    pub context_id: u64,
    /// Cluster topology for the session.
    pub dist_config: ClusterConfig,
}

/// Carries the ready-chain object id marking the context usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContextResponse {
    /// Already-resolved object downstream requests may consume as an
    /// ordering input.
    pub ready_chain: RemoteObjectIdProto,
}

/// Tears down a context, invalidating its programs and object ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseContextRequest {
    /// The context to close.
    pub context_id: u64,
}

/// Acknowledges a close.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseContextResponse {}

/// Out-of-band point-to-point payload transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDataRequest {
    /// The receiving context.
    pub context_id: u64,
    /// Caller-chosen rendezvous key.
    pub instance_key: u64,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// Acknowledges a data send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendDataResponse {}

/// Registers a program under a name within a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFunctionRequest {
    /// The owning context.
    pub context_id: u64,
    /// Name later referenced by [`RemoteExecuteRequest`].
    pub program_name: String,
    /// Encoded program bytes, understood by the configured decoder.
    pub program: Vec<u8>,
    /// Whether the receiver must compile before first execution.
    pub need_compilation: bool,
}

/// Names the device of each program output, in program order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFunctionResponse {
    /// One device name per program output.
    pub output_device: Vec<String>,
}

/// One requested output of a remote execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteExecuteOutput {
    /// Caller-allocated id the output is stored under.
    pub id: RemoteObjectIdProto,
    /// When set, the response carries serialized metadata for this output.
    pub need_metadata: bool,
}

/// Executes a registered program over stored objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteExecuteRequest {
    /// The owning context.
    pub context_id: u64,
    /// A program previously registered in this context.
    pub program_name: String,
    /// Object ids bound to the program's leading input slots, in order.
    pub input: Vec<RemoteObjectIdProto>,
    /// Ids for the program's trailing outputs, in order.
    pub output: Vec<RemoteExecuteOutput>,
}

/// Serialized metadata for each output that requested it, in request
/// order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteExecuteResponse {
    /// One entry per `need_metadata` output.
    pub metadata: Vec<Vec<u8>>,
}

/// Removes objects from a context's namespace. Deleting an id that is
/// absent (never created, or already deleted) is an idempotent no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRemoteObjectsRequest {
    /// The owning context.
    pub context_id: u64,
    /// Ids to remove.
    pub input: Vec<RemoteObjectIdProto>,
}

/// Acknowledges a delete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRemoteObjectsResponse {}

/// An RPC-level failure, carried in the response rather than dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorProto {
    /// Stringified [`ErrorKind`](crate::error::ErrorKind).
    pub kind: String,
    /// Human-readable description.
    pub message: String,
}

impl From<&Error> for ErrorProto {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.message().to_string(),
        }
    }
}

/// Transport envelope for requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// See [`CreateContextRequest`].
    CreateContext(CreateContextRequest),
    /// See [`CloseContextRequest`].
    CloseContext(CloseContextRequest),
    /// See [`SendDataRequest`].
    SendData(SendDataRequest),
    /// See [`RegisterFunctionRequest`].
    RegisterFunction(RegisterFunctionRequest),
    /// See [`RemoteExecuteRequest`].
    RemoteExecute(RemoteExecuteRequest),
    /// See [`DeleteRemoteObjectsRequest`].
    DeleteRemoteObjects(DeleteRemoteObjectsRequest),
}

/// Transport envelope for responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// See [`CreateContextResponse`].
    CreateContext(CreateContextResponse),
    /// See [`CloseContextResponse`].
    CloseContext(CloseContextResponse),
    /// See [`SendDataResponse`].
    SendData(SendDataResponse),
    /// See [`RegisterFunctionResponse`].
    RegisterFunction(RegisterFunctionResponse),
    /// See [`RemoteExecuteResponse`].
    RemoteExecute(RemoteExecuteResponse),
    /// See [`DeleteRemoteObjectsResponse`].
    DeleteRemoteObjects(DeleteRemoteObjectsResponse),
    /// The request failed; no state changed beyond what the error names.
    Error(ErrorProto),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_equality_is_structural() {
        let a = RemoteObjectIdProto {
            prefix_id: 1,
            local_id: 7,
            device: "cpu:0".into(),
        };
        let b = a.clone();
        assert_eq!(a, b);
        let c = RemoteObjectIdProto {
            device: "gpu:0".into(),
            ..a.clone()
        };
        assert_ne!(a, c);
    }

    #[test]
    fn request_envelope_round_trips_as_json() {
        let req = Request::CreateContext(CreateContextRequest {
            context_id: 0x1,
            dist_config: ClusterConfig::default(),
        });
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: Request = serde_json::from_slice(&bytes).unwrap();
        match back {
            Request::CreateContext(inner) => assert_eq!(inner.context_id, 0x1),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_proto_carries_kind_and_message() {
        use crate::error::{Error, ErrorKind};
        let err = Error::new(ErrorKind::UnknownContext, "no context 9");
        let proto = ErrorProto::from(&err);
        assert_eq!(proto.kind, ErrorKind::UnknownContext.to_string());
        assert_eq!(proto.message, "no context 9");
    }
}
