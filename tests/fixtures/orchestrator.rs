#![allow(unused)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use otelcol_e2e::environment::{Orchestrator, ServiceAddress};

/// Orchestrator double: every service resolves to one local address and each
/// lifecycle call is recorded.
#[derive(Clone)]
pub struct FakeOrchestrator {
    addr: SocketAddr,
    calls: Arc<Mutex<Vec<String>>>,
    fail_up: bool,
    fail_down: bool,
}

impl FakeOrchestrator {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_up: false,
            fail_down: false,
        }
    }

    pub fn failing_up(mut self) -> Self {
        self.fail_up = true;
        self
    }

    pub fn failing_down(mut self) -> Self {
        self.fail_down = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn downs(&self) -> usize {
        self.calls().iter().filter(|c| *c == "down").count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl Orchestrator for FakeOrchestrator {
    async fn up(&mut self) -> Result<()> {
        self.record("up");
        if self.fail_up {
            bail!("image pull failed");
        }
        Ok(())
    }

    async fn down(&mut self) -> Result<()> {
        self.record("down");
        if self.fail_down {
            bail!("network still in use");
        }
        Ok(())
    }

    async fn service_address(&self, service: &str, port: u16) -> Result<ServiceAddress> {
        self.record(format!("resolve {service}:{port}"));
        Ok(ServiceAddress {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        })
    }
}
