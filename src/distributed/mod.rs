//! Distributed contexts: per-session state plus the request/response
//! protocol that mutates it.
//!
//! A session is keyed by a caller-supplied 64-bit context id. Within a
//! context live registered programs and a namespace of remote objects;
//! [`ContextManager`] is the server-side entry point that applies protocol
//! requests against a local runtime. The transport framing these messages
//! is out of scope.

pub mod context;
pub mod manager;
pub mod program;
pub mod protocol;

pub use context::{DistributedContext, RegisteredProgram};
pub use manager::ContextManager;
pub use program::{JsonProgramDecoder, Program, ProgramDecodeError, ProgramDecoder, ProgramStep};
pub use protocol::{
    ClusterConfig, CreateContextRequest, CreateContextResponse, CloseContextRequest,
    CloseContextResponse, DeleteRemoteObjectsRequest, DeleteRemoteObjectsResponse, ErrorProto,
    JobConfig, RegisterFunctionRequest, RegisterFunctionResponse, RemoteExecuteOutput,
    RemoteExecuteRequest, RemoteExecuteResponse, RemoteObjectIdProto, Request, Response,
    SendDataRequest, SendDataResponse,
};
