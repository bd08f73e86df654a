//! [`ServiceClient`] – timeout-bound request/response proxy.
//!
//! A client is bound to one endpoint name for its whole life.  The first
//! [`invoke`][ServiceClient::invoke] waits for the endpoint to become
//! available (bounded by the connect timeout); every call is bounded by its
//! own call timeout.
//!
//! Failure modes stay distinct:
//!
//! | Situation | Error |
//! |---|---|
//! | endpoint never became available | [`NavError::Unavailable`] |
//! | no response within the call timeout | [`NavError::Timeout`] |
//! | transport could not deliver the request | [`NavError::Transport`] |
//! | endpoint answered `success == false` | [`NavError::Declined`] (via [`set`][ServiceClient::set] / [`trigger`][ServiceClient::trigger]) |

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use navcore_types::{
    NavError, SetBoolRequest, SetBoolResponse, TriggerRequest, TriggerResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::ServiceBackend;

/// How often availability is re-checked while waiting for an endpoint.
pub(crate) const AVAILABILITY_POLL: Duration = Duration::from_millis(100);

/// Typed proxy for one remote service endpoint.
pub struct ServiceClient<Req, Resp> {
    name: String,
    backend: Arc<dyn ServiceBackend>,
    connect_timeout: Duration,
    connected: AtomicBool,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> ServiceClient<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    pub fn new(
        backend: Arc<dyn ServiceBackend>,
        name: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            connect_timeout,
            connected: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    /// Endpoint this client is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the endpoint to become reachable.
    pub async fn wait_for_service(&self, timeout: Duration) -> bool {
        let ready_check = async {
            while !self.backend.is_available(&self.name).await {
                tokio::time::sleep(AVAILABILITY_POLL).await;
            }
        };
        let ready = tokio::time::timeout(timeout, ready_check).await.is_ok();
        self.connected.store(ready, Ordering::Release);
        ready
    }

    /// Send `request` and wait at most `timeout` for the response.
    ///
    /// # Errors
    ///
    /// [`NavError::Unavailable`], [`NavError::Timeout`],
    /// [`NavError::Transport`] or [`NavError::Serialization`]; a delivered
    /// response is always returned as `Ok`, whatever its content.
    pub async fn invoke(&self, request: &Req, timeout: Duration) -> Result<Resp, NavError> {
        if !self.connected.load(Ordering::Acquire)
            && !self.wait_for_service(self.connect_timeout).await
        {
            warn!(
                endpoint = %self.name,
                connect_timeout_ms = self.connect_timeout.as_millis() as u64,
                "service did not become available"
            );
            return Err(NavError::Unavailable(self.name.clone()));
        }

        let payload = serde_json::to_value(request)
            .map_err(|e| NavError::Serialization(format!("{} request: {e}", self.name)))?;
        debug!(endpoint = %self.name, request = %payload, "invoking service");

        let response = match tokio::time::timeout(timeout, self.backend.call(&self.name, payload)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                // Re-check availability before the next call.
                self.connected.store(false, Ordering::Release);
                return Err(e);
            }
            Err(_) => {
                return Err(NavError::Timeout {
                    endpoint: self.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        serde_json::from_value(response)
            .map_err(|e| NavError::Serialization(format!("{} response: {e}", self.name)))
    }
}

impl ServiceClient<SetBoolRequest, SetBoolResponse> {
    /// Call a `SetBool` endpoint, treating `success == false` as
    /// [`NavError::Declined`].
    pub async fn set(&self, data: bool, timeout: Duration) -> Result<(), NavError> {
        let response = self.invoke(&SetBoolRequest { data }, timeout).await?;
        accept(&self.name, response)
    }
}

impl ServiceClient<TriggerRequest, TriggerResponse> {
    /// Call a `Trigger` endpoint, treating `success == false` as
    /// [`NavError::Declined`].
    pub async fn trigger(&self, timeout: Duration) -> Result<(), NavError> {
        let response = self.invoke(&TriggerRequest {}, timeout).await?;
        accept(&self.name, response)
    }
}

fn accept(endpoint: &str, response: SetBoolResponse) -> Result<(), NavError> {
    if response.success {
        Ok(())
    } else {
        Err(NavError::Declined {
            endpoint: endpoint.to_string(),
            message: response.message,
        })
    }
}
