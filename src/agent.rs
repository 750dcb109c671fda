//! Connection agent: one pooled HTTP(S) transport per client.
//!
//! The transport is created lazily on the first request and carries the
//! client's TLS material. `quit()` releases it; a later request would
//! build a fresh one.

use crate::error::Error;
use crate::tls::TlsMaterial;
use std::sync::Mutex;

/// Settings the transport is built from, fixed at client construction.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub tls: TlsMaterial,
    /// Upper bound on pooled connections per host.
    pub max_sockets: Option<usize>,
    /// When false, server certificates are not verified.
    pub reject_unauthorized: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tls: TlsMaterial::default(),
            max_sockets: None,
            reject_unauthorized: true,
        }
    }
}

/// Lazily constructed pooled transport.
#[derive(Debug, Default)]
pub struct Agent {
    transport: Mutex<Option<reqwest::Client>>,
}

impl Agent {
    /// Get the pooled transport, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be created from the
    /// configured TLS material.
    pub fn obtain(&self, settings: &AgentSettings) -> Result<reqwest::Client, Error> {
        let mut slot = self
            .transport
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = build_transport(settings)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the pooled transport. Idempotent.
    pub fn release(&self) {
        let mut slot = self
            .transport
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = None;
    }
}

fn build_transport(settings: &AgentSettings) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder();

    if let Some(max_sockets) = settings.max_sockets {
        builder = builder.pool_max_idle_per_host(max_sockets);
    }
    if !settings.reject_unauthorized {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(pem) = settings.tls.identity_pem() {
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| Error::invalid_config(format!("invalid client certificate/key: {e}")))?;
        builder = builder.identity(identity);
    }
    for ca in &settings.tls.ca {
        let certificate = reqwest::Certificate::from_pem(ca)
            .map_err(|e| Error::invalid_config(format!("invalid CA certificate: {e}")))?;
        builder = builder.add_root_certificate(certificate);
    }

    builder
        .build()
        .map_err(|e| Error::invalid_config(format!("failed to create HTTP transport: {e}")))
}
