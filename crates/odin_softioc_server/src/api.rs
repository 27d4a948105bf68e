//! Request adapter.
//!
//! Turns GET and PUT requests on parameter paths into controller calls and
//! wraps the result in an [`ApiResponse`]. Errors never escape as `Err`:
//! they become a 400 response carrying `{"error": message}`.

use crate::config::AdapterConfig;
use crate::controller::SoftIocController;
use crate::error::ServerResult;
use odin_softioc_core::DevicePush;
use odin_softioc_ioc::{MemoryIoc, SoftIoc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Content type of every response.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A response to an adapter request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Content type of the body.
    pub content_type: &'static str,
    /// Response body.
    pub body: Value,
}

impl ApiResponse {
    /// A 200 response.
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            content_type: CONTENT_TYPE_JSON,
            body,
        }
    }

    /// A 400 response with an error message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            content_type: CONTENT_TYPE_JSON,
            body: json!({ "error": message.into() }),
        }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// The soft IOC adapter.
pub struct SoftIocAdapter<I: SoftIoc + DevicePush + 'static = MemoryIoc> {
    controller: SoftIocController<I>,
}

impl SoftIocAdapter<MemoryIoc> {
    /// Creates an adapter backed by an in-memory IOC.
    pub fn with_memory_ioc(config: AdapterConfig) -> ServerResult<Self> {
        Ok(Self {
            controller: SoftIocController::with_memory_ioc(config)?,
        })
    }
}

impl<I: SoftIoc + DevicePush + 'static> SoftIocAdapter<I> {
    /// Creates an adapter publishing into `ioc`.
    pub fn new(config: AdapterConfig, ioc: Arc<I>) -> ServerResult<Self> {
        let controller = SoftIocController::new(config, ioc)?;
        tracing::debug!("soft IOC adapter loaded");
        Ok(Self { controller })
    }

    /// Handles a GET request.
    pub fn get(&self, path: &str, with_metadata: bool) -> ApiResponse {
        match self.controller.get(path, with_metadata) {
            Ok(body) => ApiResponse::ok(body),
            Err(err) => {
                tracing::debug!(path, error = %err, "GET failed");
                ApiResponse::bad_request(err.to_string())
            }
        }
    }

    /// Handles a PUT request. On success the response carries the new
    /// state of `path`.
    pub fn put(&self, path: &str, body: &str) -> ApiResponse {
        let data: Value = match serde_json::from_str(body) {
            Ok(data) => data,
            Err(err) => {
                return ApiResponse::bad_request(format!(
                    "Failed to decode PUT request body: {err}"
                ))
            }
        };

        match self
            .controller
            .set(path, &data)
            .and_then(|()| self.controller.get(path, false))
        {
            Ok(body) => ApiResponse::ok(body),
            Err(err) => {
                tracing::debug!(path, error = %err, "PUT failed");
                ApiResponse::bad_request(err.to_string())
            }
        }
    }

    /// Starts the bridge. Called once all adapters are loaded.
    pub fn initialize(&self) -> ServerResult<()> {
        self.controller.initialize()
    }

    /// Shuts the bridge down.
    pub fn cleanup(&self) -> ServerResult<()> {
        self.controller.cleanup()
    }

    /// Returns the controller.
    pub fn controller(&self) -> &SoftIocController<I> {
        &self.controller
    }
}
