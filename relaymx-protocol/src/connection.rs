//! The per-connection state machine: handshake, authentication, and command
//! dispatch against the session command list and the router/backend
//! collaborators.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinSet;

use relaymx_session::{BackendId, Properties, Reply, ReplyKind, Semantics, SessionCommandList};

use crate::auth::{generate_scramble, verify_and_recover};
use crate::codec::{write_packet, PacketCodec};
use crate::collaborators::{BackendGateway, ConnectionObserver, QueryClassifier, Router, SessionId, UserRepository};
use crate::error::{ProxyError, Result};
use crate::handshake::{HandshakeResponse41, HandshakeV10};
use crate::packets::{Command, ErrPacket, OkPacket, COM_QUERY, COM_QUIT};
use crate::writer::WriteQueue;

/// Mirrors the state table in the client protocol handler's design: a
/// connection only ever moves forward through these states (or straight to
/// `Disconnected` on error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Allocated,
    HandshakeSent,
    AuthReceived,
    AuthFailed,
    Idle,
    Routing,
    WaitingResult,
    Disconnected,
}

/// Collaborators injected into every connection; cloned cheaply (all `Arc`)
/// per accepted socket.
pub struct ConnectionDeps {
    pub router: Arc<dyn Router>,
    pub gateway: Arc<dyn BackendGateway>,
    pub classifier: Arc<dyn QueryClassifier>,
    pub users: Arc<dyn UserRepository>,
    pub semantics: Semantics,
    pub properties: Properties,
    pub observer: Arc<dyn ConnectionObserver>,
}

/// Buffers partial reads and decodes full MySQL packets off of `R`.
struct FramedReader<R> {
    reader: R,
    buf: BytesMut,
    codec: PacketCodec,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    fn new(reader: R) -> Self {
        Self { reader, buf: BytesMut::with_capacity(4096), codec: PacketCodec::new() }
    }

    /// Read the next full packet, pulling more bytes off the socket as
    /// needed. `Ok(None)` means the peer closed the connection cleanly.
    async fn next_packet(&mut self) -> Result<Option<crate::codec::Packet>> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(packet));
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }
}

/// A single client connection: owns the negotiated handshake state, the
/// session command list fanned out to every attached backend, and the set
/// of backends currently eligible for live (non-replaying) dispatch.
pub struct ClientConnection {
    pub state: ConnState,
    scramble: [u8; 20],
    username: Option<Bytes>,
    password_sha1: Option<[u8; 20]>,
    session: SessionId,
    scl: Arc<SessionCommandList>,
    live_backends: Vec<BackendId>,
    deps: ConnectionDeps,
    write_queue: WriteQueue,
}

impl ClientConnection {
    pub fn new(connection_id: u32, deps: ConnectionDeps) -> Self {
        Self {
            state: ConnState::Allocated,
            scramble: generate_scramble(),
            username: None,
            password_sha1: None,
            session: SessionId(connection_id),
            scl: Arc::new(SessionCommandList::new(deps.semantics, deps.properties)),
            live_backends: Vec::new(),
            deps,
            write_queue: WriteQueue::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// The scramble generated for this connection's handshake. Exposed so
    /// test harnesses (and diagnostics) can compute a matching
    /// `mysql_native_password` response without re-parsing the wire packet.
    pub fn scramble(&self) -> [u8; 20] {
        self.scramble
    }

    /// Drive the connection from `Allocated` through authentication and the
    /// command loop until the peer disconnects or a fatal error closes it.
    pub async fn run(mut self, stream: impl AsyncRead + AsyncWrite + Unpin) -> Result<()> {
        let (reader_half, mut writer) = tokio::io::split(stream);
        let mut reader = FramedReader::new(reader_half);

        self.send_handshake(&mut writer).await?;

        let auth_packet = match reader.next_packet().await? {
            Some(p) => p,
            None => {
                self.state = ConnState::Disconnected;
                return Ok(());
            }
        };

        self.authenticate(&auth_packet.payload, &mut writer).await?;
        if self.state == ConnState::Disconnected {
            return Ok(());
        }

        loop {
            let packet = match reader.next_packet().await? {
                Some(p) => p,
                None => break,
            };
            let client_seq = packet.sequence_id;
            let command = Command::parse(&packet.payload)?;

            if matches!(command, Command::Quit) {
                self.handle_quit().await;
                break;
            }

            self.state = ConnState::Routing;
            let outcome = self.dispatch(command, &packet.payload).await;
            self.state = ConnState::WaitingResult;

            match outcome {
                Ok(Some(reply)) => {
                    self.write_reply(&mut writer, client_seq, &reply).await?;
                }
                Ok(None) => {}
                Err(ProxyError::NoBackend) => {
                    let err = ErrPacket::new(2003, "HY000", "Connection to backend lost");
                    self.write_err(&mut writer, client_seq, &err).await?;
                }
                Err(ProxyError::Poisoned) => {
                    self.state = ConnState::Disconnected;
                    break;
                }
                Err(e) => return Err(e),
            }

            if self.scl.is_poisoned() {
                self.state = ConnState::Disconnected;
                break;
            }
            self.state = ConnState::Idle;
        }

        self.state = ConnState::Disconnected;
        for backend in self.live_backends.drain(..) {
            self.scl.detach(backend);
        }
        Ok(())
    }

    async fn send_handshake(&mut self, writer: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let connection_id = self.session.0;
        let handshake = HandshakeV10::new(connection_id, self.scramble);
        let mut buf = BytesMut::new();
        handshake.write(&mut buf);
        let mut frame = BytesMut::new();
        write_packet(&buf, 0, &mut frame);
        self.write_queue.write(writer, &frame).await?;
        self.state = ConnState::HandshakeSent;
        Ok(())
    }

    async fn authenticate(&mut self, payload: &[u8], writer: &mut (impl AsyncWrite + Unpin)) -> Result<()> {
        let response = HandshakeResponse41::parse(payload)?;
        let username = response.username.clone();

        let stored = self.deps.users.lookup_password_sha1(&username).await?;
        let verified = match stored {
            None => None,
            Some(stored_hash) => {
                if response.auth_response.is_empty() {
                    if stored_hash == [0u8; 20] {
                        Some([0u8; 20])
                    } else {
                        None
                    }
                } else {
                    verify_and_recover(&response.auth_response, &self.scramble, &stored_hash)
                }
            }
        };

        match verified {
            Some(password_sha1) => {
                self.username = Some(username);
                self.password_sha1 = Some(password_sha1);
                self.state = ConnState::AuthReceived;

                let ok = OkPacket { status_flags: 0x0002, ..OkPacket::default() };
                let mut buf = BytesMut::new();
                ok.write(&mut buf);
                let mut frame = BytesMut::new();
                write_packet(&buf, 2, &mut frame);
                self.write_queue.write(writer, &frame).await?;
                self.state = ConnState::Idle;
                Ok(())
            }
            None => {
                self.state = ConnState::AuthFailed;
                self.deps.observer.auth_failed();
                let err = ErrPacket::new(1045, "28000", "Access denied!");
                let mut buf = BytesMut::new();
                err.write(&mut buf);
                let mut frame = BytesMut::new();
                write_packet(&buf, 2, &mut frame);
                self.write_queue.write(writer, &frame).await?;
                self.state = ConnState::Disconnected;
                Ok(())
            }
        }
    }

    async fn handle_quit(&mut self) {
        for backend in self.live_backends.drain(..) {
            let _ = self.deps.gateway.send_and_await(backend, COM_QUIT, &[]).await;
            self.scl.detach(backend);
        }
        self.state = ConnState::Disconnected;
    }

    /// Attach a newly available backend to this session, replaying
    /// recorded session-modifying history before it joins the live pool.
    pub async fn attach_backend(&mut self, backend: BackendId) -> Result<()> {
        let outcome = self.scl.attach(backend);
        if outcome.needs_replay {
            let mut replayed = 0usize;
            loop {
                let command = match self.scl.current_for_replay(backend)? {
                    Some(c) => c,
                    None => break,
                };
                let reply = self.deps.gateway.send_and_await(backend, command.opcode, &command.payload).await?;
                let advance = self.scl.advance(backend, reply)?;
                replayed += 1;
                if advance.poisoned {
                    return Err(ProxyError::Poisoned);
                }
                if advance.entered_live {
                    break;
                }
            }
            self.deps.observer.replay_lag(replayed);
        }
        self.live_backends.push(backend);
        Ok(())
    }

    async fn dispatch(&mut self, command: Command, raw_payload: &Bytes) -> Result<Option<Reply>> {
        let opcode = *raw_payload.first().unwrap_or(&0);

        if opcode == crate::packets::COM_PING {
            return Ok(Some(Reply::ok(Bytes::new())));
        }
        if opcode == crate::packets::COM_STATISTICS {
            return Ok(Some(Reply { kind: ReplyKind::Ok, payload: Bytes::from_static(b"Uptime: 0  Threads: 1") }));
        }

        let is_session_modifying = command.is_unconditionally_session_modifying()
            || match &command {
                Command::Query(q) => self.deps.classifier.is_session_modifying(q),
                _ => false,
            };

        if is_session_modifying {
            let rest = raw_payload.slice(1..);
            self.dispatch_session_command(opcode, rest).await
        } else {
            self.route_single(raw_payload).await.map(Some)
        }
    }

    async fn dispatch_session_command(&mut self, opcode: u8, rest: Bytes) -> Result<Option<Reply>> {
        let command = self.scl.append(opcode, rest.clone())?;
        self.deps.observer.session_command_appended();
        self.deps.observer.session_list_len(self.scl.len());
        let payload = command.payload.clone();

        let mut joinset: JoinSet<(BackendId, Result<Reply>)> = JoinSet::new();
        for &backend in &self.live_backends {
            let gateway = self.deps.gateway.clone();
            let payload = payload.clone();
            joinset.spawn(async move {
                let reply = gateway.send_and_await(backend, opcode, &payload).await;
                (backend, reply)
            });
        }

        let mut canonical = None;
        let mut poisoned = false;
        while let Some(joined) = joinset.join_next().await {
            let (backend, reply) = joined.map_err(|e| ProxyError::Protocol(format!("backend task panicked: {e}")))?;
            let reply = match reply {
                Ok(r) => r,
                Err(_) => continue,
            };
            let advance = self.scl.advance(backend, reply)?;
            if advance.poisoned {
                poisoned = true;
            }
            if canonical.is_none() {
                canonical = advance.to_forward;
            }
        }

        if poisoned {
            return Err(ProxyError::Poisoned);
        }
        Ok(canonical)
    }

    async fn route_single(&mut self, raw_payload: &Bytes) -> Result<Reply> {
        let opcode = *raw_payload.first().unwrap_or(&0);
        let rest = raw_payload.slice(1..);
        let backend = self.deps.router.route_query(self.session, raw_payload).await?;
        self.deps.gateway.send_and_await(backend, opcode, &rest).await
    }

    async fn write_reply(&mut self, writer: &mut (impl AsyncWrite + Unpin), client_seq: u8, reply: &Reply) -> Result<()> {
        let mut frame = BytesMut::new();
        write_packet(&reply.payload, client_seq.wrapping_add(1), &mut frame);
        self.write_queue.write(writer, &frame).await
    }

    async fn write_err(&mut self, writer: &mut (impl AsyncWrite + Unpin), client_seq: u8, err: &ErrPacket) -> Result<()> {
        let mut buf = BytesMut::new();
        err.write(&mut buf);
        let mut frame = BytesMut::new();
        write_packet(&buf, client_seq.wrapping_add(1), &mut frame);
        self.write_queue.write(writer, &frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{KeywordClassifier, SingleBackendRouter, StaticUserRepository};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct EchoGateway;

    #[async_trait]
    impl BackendGateway for EchoGateway {
        async fn send_and_await(&self, _backend: BackendId, _opcode: u8, _payload: &[u8]) -> Result<Reply> {
            Ok(Reply::ok(Bytes::new()))
        }
    }

    struct CountingGateway {
        calls: StdMutex<Vec<BackendId>>,
    }

    #[async_trait]
    impl BackendGateway for CountingGateway {
        async fn send_and_await(&self, backend: BackendId, _opcode: u8, _payload: &[u8]) -> Result<Reply> {
            self.calls.lock().unwrap().push(backend);
            Ok(Reply::ok(Bytes::new()))
        }
    }

    fn deps(gateway: Arc<dyn BackendGateway>) -> ConnectionDeps {
        ConnectionDeps {
            router: Arc::new(SingleBackendRouter::new(BackendId(1))),
            gateway,
            classifier: Arc::new(KeywordClassifier),
            users: Arc::new(StaticUserRepository::new().with_password("alice", b"secret")),
            semantics: Semantics::default(),
            properties: Properties::default(),
            observer: Arc::new(crate::collaborators::NoopObserver),
        }
    }

    #[tokio::test]
    async fn full_handshake_and_auth_happy_path() {
        let (client, server) = tokio::io::duplex(8192);
        let conn = ClientConnection::new(1, deps(Arc::new(EchoGateway)));

        let server_task = tokio::spawn(async move { conn.run(server).await });

        let mut client_reader = FramedReader::new(client);
        let handshake_packet = client_reader.next_packet().await.unwrap().unwrap();
        assert_eq!(handshake_packet.payload[0], 10);

        let scramble = {
            // bytes [1..] up to NUL is server version, then 4-byte conn id, then 8 scramble bytes.
            let p = &handshake_packet.payload[..];
            let nul = p[1..].iter().position(|&b| b == 0).unwrap() + 1;
            let mut off = nul + 1 + 4;
            let mut scramble = [0u8; 20];
            scramble[..8].copy_from_slice(&p[off..off + 8]);
            off += 8 + 1 + 2 + 1 + 2 + 2 + 1 + 10;
            scramble[8..].copy_from_slice(&p[off..off + 12]);
            scramble
        };

        let token = crate::auth::scramble_password(b"secret", &scramble);
        let mut resp = BytesMut::new();
        resp.extend_from_slice(&0x0000_8a05u32.to_le_bytes()); // client caps incl CLIENT_SECURE_CONNECTION
        resp.extend_from_slice(&[0u8; 4]); // max packet size
        resp.extend_from_slice(&[0x21]); // charset
        resp.extend_from_slice(&[0u8; 23]); // reserved
        resp.extend_from_slice(b"alice\0");
        resp.extend_from_slice(&[20u8]);
        resp.extend_from_slice(&token);

        let mut frame = BytesMut::new();
        write_packet(&resp, 1, &mut frame);
        use tokio::io::AsyncWriteExt;
        let mut client = client_reader.reader;
        client.write_all(&frame).await.unwrap();

        let ok_packet = {
            let mut reader = FramedReader::new(client);
            let packet = reader.next_packet().await.unwrap().unwrap();
            packet
        };
        assert_eq!(ok_packet.sequence_id, 2);
        assert_eq!(ok_packet.payload[0], 0x00);

        drop(server_task);
    }

    #[tokio::test]
    async fn auth_failure_for_unknown_user_sends_access_denied() {
        let (client, server) = tokio::io::duplex(8192);
        let conn = ClientConnection::new(1, deps(Arc::new(EchoGateway)));
        let server_task = tokio::spawn(async move { conn.run(server).await });

        let mut reader = FramedReader::new(client);
        let _handshake = reader.next_packet().await.unwrap().unwrap();

        let mut resp = BytesMut::new();
        resp.extend_from_slice(&0x0000_8a05u32.to_le_bytes());
        resp.extend_from_slice(&[0u8; 4]);
        resp.extend_from_slice(&[0x21]);
        resp.extend_from_slice(&[0u8; 23]);
        resp.extend_from_slice(b"ghost\0");
        resp.extend_from_slice(&[20u8]);
        resp.extend_from_slice(&[0xAAu8; 20]);

        let mut frame = BytesMut::new();
        write_packet(&resp, 1, &mut frame);
        use tokio::io::AsyncWriteExt;
        reader.reader.write_all(&frame).await.unwrap();

        let err_packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(err_packet.payload[0], 0xFF);
        let code = u16::from_le_bytes([err_packet.payload[1], err_packet.payload[2]]);
        assert_eq!(code, 1045);
        assert_eq!(&err_packet.payload[4..9], b"28000");

        let _ = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn attach_backend_replays_session_history_then_joins_live_pool() {
        let gateway = Arc::new(CountingGateway { calls: StdMutex::new(Vec::new()) });
        let mut conn = ClientConnection::new(1, deps(gateway.clone()));

        conn.attach_backend(BackendId(1)).await.unwrap();
        conn.dispatch_session_command(COM_QUERY, Bytes::from_static(b"SET autocommit=0")).await.unwrap();

        conn.attach_backend(BackendId(2)).await.unwrap();
        assert_eq!(gateway.calls.lock().unwrap().as_slice(), &[BackendId(2)]);
        assert!(conn.live_backends.contains(&BackendId(2)));
    }
}
