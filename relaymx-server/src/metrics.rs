//! Prometheus registrations and a minimal `/metrics` responder.
//!
//! This proxy core pulls in no HTTP framework, so the single `/metrics`
//! route is served directly over a `tokio::net::TcpListener` rather than
//! through a web framework (see DESIGN.md).

use prometheus::{register_gauge, register_int_counter, Encoder, Gauge, IntCounter, TextEncoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

lazy_static::lazy_static! {
    pub static ref CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "relaymx_connections_total",
        "Total number of client connections accepted"
    ).unwrap();

    pub static ref ACTIVE_CONNECTIONS: Gauge = register_gauge!(
        "relaymx_active_connections",
        "Current number of client connections being served"
    ).unwrap();

    pub static ref SESSION_COMMANDS_TOTAL: IntCounter = register_int_counter!(
        "relaymx_session_commands_total",
        "Total number of session-modifying commands appended to a session command list"
    ).unwrap();

    pub static ref SESSION_LIST_LEN: Gauge = register_gauge!(
        "relaymx_session_list_len",
        "Current length of the longest-lived session command list"
    ).unwrap();

    pub static ref REPLAY_LAG: Gauge = register_gauge!(
        "relaymx_replay_lag",
        "Number of recorded commands a newly attached backend still has to replay"
    ).unwrap();

    pub static ref AUTH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "relaymx_auth_failures_total",
        "Total number of failed authentication attempts"
    ).unwrap();
}

/// Feeds the protocol handler's [`relaymx_protocol::collaborators::ConnectionObserver`]
/// events into the Prometheus gauges/counters declared above.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusObserver;

impl relaymx_protocol::collaborators::ConnectionObserver for PrometheusObserver {
    fn auth_failed(&self) {
        AUTH_FAILURES_TOTAL.inc();
    }

    fn session_command_appended(&self) {
        SESSION_COMMANDS_TOTAL.inc();
    }

    fn session_list_len(&self, len: usize) {
        SESSION_LIST_LEN.set(len as f64);
    }

    fn replay_lag(&self, commands_remaining: usize) {
        REPLAY_LAG.set(commands_remaining as f64);
    }
}

fn render() -> Vec<u8> {
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer).expect("prometheus text encoding never fails");
    buffer
}

/// Serve `GET /metrics` until the process is torn down. Any other request
/// line gets a 404; this is deliberately not a general-purpose HTTP server.
pub async fn serve(bind_address: &str, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    tracing::info!(%bind_address, port, "metrics endpoint listening");
    loop {
        let (mut socket, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let n = match socket.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            let request_line = buf[..n].split(|&b| b == b'\r' || b == b'\n').next().unwrap_or(&[]);
            let is_metrics_get = request_line.starts_with(b"GET /metrics ");

            let response = if is_metrics_get {
                let body = render();
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let mut response = header.into_bytes();
                response.extend_from_slice(&body);
                response
            } else {
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec()
            };
            let _ = socket.write_all(&response).await;
        });
    }
}
