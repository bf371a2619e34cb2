//! The backend-facing MySQL protocol handler is out of scope for this
//! crate (see the router/backend-gateway collaborators named in the
//! design). This module wires a placeholder [`BackendGateway`] so the
//! listener can run end-to-end; a real deployment replaces it with a
//! gateway that dials backend `mysqld` instances and speaks the backend
//! wire protocol.

use std::sync::Arc;

use async_trait::async_trait;

use relaymx_protocol::collaborators::BackendGateway;
use relaymx_protocol::error::{ProxyError, Result};
use relaymx_session::{BackendId, Reply};

struct UnavailableGateway;

#[async_trait]
impl BackendGateway for UnavailableGateway {
    async fn send_and_await(&self, backend: BackendId, opcode: u8, _payload: &[u8]) -> Result<Reply> {
        tracing::warn!(?backend, opcode, "no backend gateway configured; dropping command");
        Err(ProxyError::NoBackend)
    }
}

pub fn unavailable_gateway() -> Arc<dyn BackendGateway> {
    Arc::new(UnavailableGateway)
}
