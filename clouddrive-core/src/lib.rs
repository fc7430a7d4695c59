mod client;
mod token;
mod wire;

pub use client::{
    ApiErrorKind, ClientConfig, DriveClient, DriveError, Endpoints, classify_status,
};
pub use token::{Token, TokenError, TokenProvider, TokenRefresher};
pub use wire::{
    ChangeRecord, ChangesRequest, ContentProperties, NewNode, NodeKind, NodeListPage,
    NodePayload, NodeStatus,
};
