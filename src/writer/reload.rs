//! Proxy reload hooks.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::config::ReloadConfig;
use crate::descriptor::RouteDescriptor;
use crate::writer::types::ReloadError;

/// How the proxy is told a new descriptor is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadHook {
    /// The proxy watches the file itself.
    None,
    /// Shell command, run through `sh -c`.
    Command(String),
    /// Endpoint that receives a JSON [`ReloadNotice`] by POST.
    Http { url: Url },
}

/// Body POSTed to an HTTP reload hook.
#[derive(Debug, Serialize)]
pub struct ReloadNotice<'a> {
    pub digest: &'a str,
    pub services: Vec<&'a str>,
}

impl<'a> ReloadNotice<'a> {
    pub fn for_descriptor(descriptor: &'a RouteDescriptor) -> Self {
        Self {
            digest: descriptor.digest(),
            services: descriptor.services().keys().map(String::as_str).collect(),
        }
    }
}

impl ReloadHook {
    /// Command wins over url when both are present; validation rejects that
    /// combination in mapping files.
    pub fn from_config(config: &ReloadConfig) -> Result<Self, ReloadError> {
        if let Some(command) = config.command.as_deref().filter(|c| !c.trim().is_empty()) {
            return Ok(ReloadHook::Command(command.to_string()));
        }
        match config.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|e| ReloadError::InvalidUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(ReloadHook::Http { url })
            }
            None => Ok(ReloadHook::None),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ReloadHook::None)
    }

    /// Run the hook once. Returns `false` if there is nothing to run.
    pub async fn trigger(
        &self,
        descriptor: &RouteDescriptor,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<bool, ReloadError> {
        match self {
            ReloadHook::None => Ok(false),
            ReloadHook::Command(command) => {
                run_command(command, descriptor.digest(), timeout).await?;
                Ok(true)
            }
            ReloadHook::Http { url } => {
                let response = client
                    .post(url.clone())
                    .timeout(timeout)
                    .json(&ReloadNotice::for_descriptor(descriptor))
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ReloadError::HttpStatus {
                        status: status.as_u16(),
                    });
                }
                Ok(true)
            }
        }
    }
}

async fn run_command(command: &str, digest: &str, timeout: Duration) -> Result<(), ReloadError> {
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("RECONCILER_DIGEST", digest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ReloadError::Timeout(timeout))?
        .map_err(ReloadError::Spawn)?;

    if !output.status.success() {
        return Err(ReloadError::CommandFailed {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tracing::debug!(command, "Reload command succeeded");
    Ok(())
}
