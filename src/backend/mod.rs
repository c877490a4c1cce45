//! Numeric backend identification and capability probing
//!
//! Backends are tried in priority order; the first whose probe succeeds
//! hosts the primary pipeline. A failed probe never aborts the scan.

pub mod ort;

use crate::error::OcrError;
use crate::session::SessionOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Capability class of the engine that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// GPU compute API (CUDA)
    GpuCompute,
    /// GPU via a graphics/shader API (DirectML)
    GpuShader,
    /// CPU with SIMD kernels and a configured thread pool
    Vectorized,
    /// The secondary, self-contained OCR engine
    Secondary,
}

impl Backend {
    /// Default probing order for the primary pipeline, fastest first
    pub const PRIORITY: [Backend; 3] = [Backend::GpuCompute, Backend::GpuShader, Backend::Vectorized];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GpuCompute => "gpu_compute",
            Self::GpuShader => "gpu_shader",
            Self::Vectorized => "vectorized",
            Self::Secondary => "secondary",
        }
    }

    pub fn is_primary(&self) -> bool {
        !matches!(self, Self::Secondary)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability probe for a single backend
#[async_trait]
pub trait BackendProbe: Send + Sync {
    fn backend(&self) -> Backend;

    /// Check platform support and run a trivial inference. On success returns
    /// the runtime configuration sessions on this backend should use.
    async fn probe(&self) -> Result<SessionOptions, OcrError>;
}

/// Picks the first usable backend from an ordered candidate list
pub struct BackendSelector {
    probes: Vec<Box<dyn BackendProbe>>,
    probe_timeout: Duration,
}

impl BackendSelector {
    pub fn new(probes: Vec<Box<dyn BackendProbe>>, probe_timeout: Duration) -> Self {
        Self {
            probes,
            probe_timeout,
        }
    }

    pub fn candidates(&self) -> Vec<Backend> {
        self.probes.iter().map(|p| p.backend()).collect()
    }

    /// Probe each candidate in order and return the winner's session options.
    pub async fn select(&self) -> Result<SessionOptions, OcrError> {
        for probe in &self.probes {
            let backend = probe.backend();
            tracing::debug!(backend = %backend, "Probing backend");

            match tokio::time::timeout(self.probe_timeout, probe.probe()).await {
                Ok(Ok(options)) => {
                    tracing::info!(backend = %backend, "Selected inference backend");
                    return Ok(options);
                }
                Ok(Err(e)) => {
                    tracing::warn!(backend = %backend, error = %e, "Backend probe failed");
                }
                Err(_) => {
                    tracing::warn!(
                        backend = %backend,
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Backend probe timed out"
                    );
                }
            }
        }

        Err(OcrError::NoBackendAvailable)
    }
}
