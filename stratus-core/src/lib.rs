mod client;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, Node, NodeKind, NodeList, NodeStatus, ProgressFn,
    UploadRequest,
};
