//! Data models for the cached API resources.
//!
//! Each model parses straight from its API response and is also the
//! on-disk cache format.

pub mod client_config;
pub mod server;
pub mod streaming;

pub use client_config::{ClientConfig, DefaultPorts, OpenVpnPorts};
pub use server::{LogicalServer, PhysicalServer, ServerList, ServerLoads};
pub use streaming::{StreamingIcons, StreamingService, StreamingServices};
