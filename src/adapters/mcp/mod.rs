//! Broker transports.
//!
//! The HTTP server exposes the human REST surface and the agent WebSocket
//! endpoint. Agents reach the broker either over that socket or, when running
//! in the same process, through a local link. Both speak the same frames.

pub mod broker_client;
pub mod broker_http;
pub mod frame_link;
pub mod local_link;

pub use broker_client::{agent_endpoint, connect_ws, WsBrokerClient};
pub use broker_http::{BrokerHttpConfig, BrokerHttpServer, ErrorResponse};
pub use frame_link::FrameLink;
pub use local_link::{connect_local, LocalBrokerLink};
