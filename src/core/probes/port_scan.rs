// src/core/probes/port_scan.rs

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::to_payload;
use crate::core::models::{ErrorKind, ProbeName};
use crate::core::probe::{ProbeAdapter, ProbeContext, ProbeError};

/// Connection attempts in flight at once.
const MAX_PARALLEL_CONNECTS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPorts {
    pub address: IpAddr,
    pub scanned: usize,
    /// Ascending.
    pub open: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Open,
    Closed,
    /// Something other than a refusal or a silent drop; the host may be unreachable.
    Error,
}

pub struct PortScanProbe {
    ports: Vec<u16>,
    connect_timeout: Duration,
}

impl PortScanProbe {
    pub fn new(ports: Vec<u16>, connect_timeout: Duration) -> Self {
        let mut ports = ports;
        ports.sort_unstable();
        ports.dedup();
        Self { ports, connect_timeout }
    }

    pub async fn scan(&self, address: IpAddr) -> Result<OpenPorts, ProbeError> {
        let limiter = Arc::new(Semaphore::new(MAX_PARALLEL_CONNECTS));
        let mut tasks = JoinSet::new();
        for &port in &self.ports {
            let limiter = Arc::clone(&limiter);
            let connect_timeout = self.connect_timeout;
            tasks.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return (port, PortState::Error);
                };
                (port, probe_port(SocketAddr::new(address, port), connect_timeout).await)
            });
        }

        let mut open = Vec::new();
        let mut errors = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((port, PortState::Open)) => open.push(port),
                Ok((_, PortState::Closed)) => {}
                Ok((_, PortState::Error)) | Err(_) => errors += 1,
            }
        }

        if !self.ports.is_empty() && errors == self.ports.len() {
            return Err(ProbeError::transient(
                ErrorKind::Network,
                format!("{address} unreachable on every scanned port"),
            ));
        }
        open.sort_unstable();
        Ok(OpenPorts { address, scanned: self.ports.len(), open })
    }
}

async fn probe_port(addr: SocketAddr, connect_timeout: Duration) -> PortState {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            debug!(%addr, "Port open.");
            PortState::Open
        }
        Ok(Err(e)) => classify(&e),
        Err(_) => PortState::Closed,
    }
}

fn classify(e: &io::Error) -> PortState {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset | io::ErrorKind::TimedOut => {
            PortState::Closed
        }
        _ => PortState::Error,
    }
}

#[async_trait]
impl ProbeAdapter for PortScanProbe {
    fn name(&self) -> ProbeName {
        ProbeName::OpenPorts
    }

    async fn run(&self, ctx: &ProbeContext) -> Result<serde_json::Value, ProbeError> {
        let address = ctx
            .first_ipv4()
            .ok_or_else(|| ProbeError::terminal(ErrorKind::Internal, "no resolved address"))?;
        info!(%address, ports = self.ports.len(), "Starting port scan.");
        let result = self.scan(address).await?;
        info!(%address, open = ?result.open, "Port scan finished.");
        to_payload(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn finds_listening_ports_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        // Bind and drop to get a port that is almost certainly closed.
        let closed_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let probe = PortScanProbe::new(vec![closed_port, open_port, open_port], Duration::from_millis(500));
        let result = probe.scan("127.0.0.1".parse().unwrap()).await.unwrap();

        assert_eq!(result.scanned, 2);
        assert_eq!(result.open, vec![open_port]);
    }

    #[tokio::test]
    async fn no_open_ports_is_still_a_result() {
        let closed_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let probe = PortScanProbe::new(vec![closed_port], Duration::from_millis(500));
        let result = probe.scan("127.0.0.1".parse().unwrap()).await.unwrap();
        assert!(result.open.is_empty());
    }
}
