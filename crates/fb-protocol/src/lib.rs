//! fb-protocol: Wire protocol for the fetchback duplex channel
//!
//! This crate defines the JSON messages exchanged between the coordinator
//! and its agents over a WebSocket, and the codec that frames them.

pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod status;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use command::{
    sorted_parts, CancelUploadRequest, Command, DownloadAccepted, DownloadFileRequest,
    DownloadFileResult, EtagMap, HealthReport, PartUrl, UploadTicket,
};
pub use error::ProtocolError;
pub use message::{
    Action, CommandMessage, Heartbeat, Message, MessageType, ResponseMessage, ResponseStatus,
    PROTOCOL_VERSION,
};
pub use status::{StatusMessage, SystemInfo, UploadProgress};
