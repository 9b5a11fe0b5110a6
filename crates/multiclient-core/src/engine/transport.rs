use super::errors::EngineError;
use crate::types::EngineTarget;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use url::Url;

/// Opaque JSON-in/JSON-out channel to one lite-client engine.
///
/// Implementations report connection problems as [`EngineError::Unreachable`] and
/// unparseable replies as [`EngineError::Protocol`]. Deadlines and cancellation are
/// applied by the caller, so `call` may simply await the engine.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn call(&self, payload: &Value) -> Result<Value, EngineError>;
}

/// Opens transports for engine targets.
///
/// Called by the pool whenever an engine is added or replaced.
pub trait EngineConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`EngineError::Unreachable`] if the target cannot be connected to.
    fn connect(&self, target: &EngineTarget) -> Result<Arc<dyn EngineTransport>, EngineError>;
}

/// Converts an engine-reported error object into an [`EngineError`].
///
/// Lite-client engines answer failed queries with `{"@type": "error", "code", "message"}`
/// instead of failing the call.
///
/// # Errors
///
/// Returns [`EngineError::EngineReported`] for error objects.
pub fn inspect_response(value: Value) -> Result<Value, EngineError> {
    if value.get("@type").and_then(Value::as_str) != Some("error") {
        return Ok(value);
    }

    let code = value.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
    Err(EngineError::EngineReported { code, message })
}

/// Sanitizes network errors so engine addresses never leak into caller-visible messages.
fn sanitize_network_error(error: &reqwest::Error) -> String {
    if error.is_connect() {
        "connection refused or unreachable".to_string()
    } else if error.is_request() {
        "request failed".to_string()
    } else if error.is_body() {
        "response body error".to_string()
    } else if error.is_redirect() {
        "too many redirects".to_string()
    } else {
        "network error".to_string()
    }
}

/// Connector for engines exposed through a JSON-over-HTTP gateway.
///
/// All transports it creates share one pooled reqwest client.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, EngineError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("multiclient/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                EngineError::Unreachable(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client })
    }
}

impl EngineConnector for HttpConnector {
    fn connect(&self, target: &EngineTarget) -> Result<Arc<dyn EngineTransport>, EngineError> {
        let url = Url::parse(&target.address).map_err(|e| {
            EngineError::Unreachable(format!("invalid engine address for {}: {e}", target.name))
        })?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(EngineError::Unreachable(format!(
                    "unsupported scheme {scheme} for {}",
                    target.name
                )))
            }
        }

        Ok(Arc::new(HttpTransport { client: self.client.clone(), url }))
    }
}

/// Posts each payload to the engine gateway and parses the JSON reply.
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EngineTransport for HttpTransport {
    async fn call(&self, payload: &Value) -> Result<Value, EngineError> {
        let response =
            self.client.post(self.url.clone()).json(payload).send().await.map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Unreachable(sanitize_network_error(&e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Protocol(format!("HTTP {}", status.as_u16())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid JSON response: {e}")))
    }
}
