//! Card-feed social service: the action service behind every RPC, the
//! feed and ranking engines it drives, and the method router shared by
//! the WebSocket gateway and the HTTP endpoint.

pub mod alias;
pub mod coins;
pub mod collaborators;
pub mod content;
pub mod feed;
pub mod notifications;
pub mod ranking;
pub mod rpc;
pub mod service;
pub mod views;

pub use rpc::RpcHandler;
pub use service::{ActionService, MaintenanceReport};
