//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use packet_tcp::{NetworkConfig, Server, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register::<Ping>("test.Ping").unwrap();
    registry.register::<Pong>("test.Pong").unwrap();
    registry.register::<Notice>("test.Notice").unwrap();
    registry.register::<Blob>("test.Blob").unwrap();
    Arc::new(registry)
}

/// Config listening on an ephemeral loopback port.
pub fn config() -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.server.shutdown_timeout = Duration::from_secs(2);
        c.client.request_timeout = Duration::from_secs(2);
    })
}

/// Bind and start a server, returning it with a config whose client section points at it.
pub async fn start_server(mut config: NetworkConfig) -> (Server, NetworkConfig) {
    let server = Server::bind(&config, registry()).await.unwrap();
    server.start().unwrap();
    config.client.address = server.local_addr().to_string();
    (server, config)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
