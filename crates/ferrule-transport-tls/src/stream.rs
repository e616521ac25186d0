use std::{
    net::SocketAddr,
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
    time::Instant,
};

use ferrule_transport::{
    ConnectTarget, KeepAlive, ListenTarget, RawTransport, ReadOutcome, Result,
};
use ferrule_transport_tcp::{TcpTransport, wait_fd};
use rustls::{Connection, ProtocolVersion};
use tracing::{debug, error, warn};

use crate::{
    config::{AuthPolicy, Mode, StreamSettings},
    credentials::Credentials,
    engine::{self, Progress, Session},
    error::{self, abort_requested, operation_error},
};

/// 连接在握手中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// 握手推进的结果；`Pending` 不是错误，调用方在就绪后再次推进。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeStatus {
    Complete,
    Pending,
}

/// TLS 流驱动：包装一个原始传输，在明文与 TLS 两种模式下提供一致的收发接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 上层只面对一套 connect/accept/send/receive/abort 接口，模式切换不影响调用代码；
/// - 明文模式下纯透传，不触碰任何引擎状态。
///
/// ## 逻辑（How）
/// - 建连：加载凭据 → 原始传输建连 → （TLS 模式）构建客户端配置并推进握手；
/// - 接受：原始传输接受 → 复制监听连接的配置 → （TLS 模式）加载凭据、构建服务端配置并推进握手，
///   失败时子连接整体释放；
/// - 握手遇到 would-block 时：未配置 `handshake_timeout` 则立即返回 `Pending`，
///   否则在预算内等待描述符就绪后继续；
/// - 接收与发送会隐式推进尚未完成的握手。
///
/// ## 契约（What）
/// - 接收：would-block → [`ReadOutcome::Retry`]；`close_notify` 或零字节读 → [`ReadOutcome::EndOfStream`]；
/// - 发送：返回引擎实际接受的字节数，可能小于请求长度，调用方需续写剩余部分；
/// - TLS 模式下的致命读写失败会把连接标记为中止，之后的读写直接返回
///   [`ErrorKind::AbortRequested`](ferrule_transport::ErrorKind::AbortRequested)；
/// - `abort` 只在明文模式下复位连接，TLS 模式下为空操作；
/// - `close_session` 之后会话不再可用，收发返回 `ferrule.transport.tls.not_connected`；
/// - 释放顺序由字段顺序保证：引擎会话 → 凭据 → 原始传输。
///
/// ## 风险与权衡（Trade-offs）
/// - 不提供内部加锁，同一连接上同时只能有一个发送与一个接收；
/// - 发送在内部等待写就绪，不把 would-block 交还给调用方。
#[derive(Debug)]
pub struct TlsStream<T: RawTransport = TcpTransport> {
    session: Option<Session>,
    credentials: Option<Credentials>,
    raw: T,
    settings: StreamSettings,
    role: Role,
    session_active: bool,
    closed: bool,
    aborted: bool,
    socket_descriptor: RawFd,
}

impl<T: RawTransport> TlsStream<T> {
    fn from_raw(raw: T, settings: StreamSettings, role: Role) -> Self {
        let socket_descriptor = raw.as_fd().as_raw_fd();
        Self {
            session: None,
            credentials: None,
            raw,
            settings,
            role,
            session_active: false,
            closed: false,
            aborted: false,
            socket_descriptor,
        }
    }

    /// 作为客户端建连；TLS 模式下握手推进到完成或 would-block。
    pub fn connect(settings: StreamSettings, target: &ConnectTarget) -> Result<Self> {
        let credentials = Credentials::load(&settings.resolved_credentials())?;
        let mut raw = T::connect(target)?;
        raw.set_keep_alive(settings.keep_alive());
        let mut stream = Self::from_raw(raw, settings, Role::Client);
        if stream.settings.mode() == Mode::Plain {
            stream.credentials = Some(credentials);
            debug!(host = %target.host, port = target.port, "plain stream connected");
            return Ok(stream);
        }

        let config = engine::client_config(&stream.settings, &credentials)?;
        let name = match (stream.settings.auth_policy(), stream.settings.permitted_peer()) {
            (AuthPolicy::RequireValidCertAndName, Some(peer)) => peer,
            _ => target.host.as_str(),
        };
        let session = Session::client(
            config,
            engine::server_name(name)?,
            stream.settings.send_buffer_limit(),
        )?;
        stream.credentials = Some(credentials);
        stream.session = Some(session);
        match stream.complete_handshake() {
            Ok(status) => {
                debug!(host = %target.host, port = target.port, ?status, "tls stream connected");
                Ok(stream)
            }
            Err(err) => {
                error!(host = %target.host, code = err.code(), error = %err, "tls connect failed");
                Err(err)
            }
        }
    }

    /// 绑定并监听；接受得到的子连接继承这里的全部配置。
    pub fn listen(settings: StreamSettings, target: &ListenTarget) -> Result<Self> {
        let mut raw = T::listen(target)?;
        raw.set_keep_alive(settings.keep_alive());
        Ok(Self::from_raw(raw, settings, Role::Server))
    }

    /// 在监听连接上接受一个对端。
    pub fn accept_conn_req(&self) -> Result<Self> {
        let raw = self.raw.accept_conn_req()?;
        let mut child = Self::from_raw(raw, self.settings.clone(), Role::Server);
        if child.settings.mode() == Mode::Plain {
            return Ok(child);
        }
        match child.start_server_session() {
            Ok(status) => {
                debug!(peer = ?child.peer_addr(), ?status, "tls stream accepted");
                Ok(child)
            }
            Err(err) => {
                error!(peer = ?child.peer_addr(), code = err.code(), error = %err, "tls accept failed");
                Err(err)
            }
        }
    }

    fn start_server_session(&mut self) -> Result<HandshakeStatus> {
        let credentials = Credentials::load(&self.settings.resolved_credentials())?;
        let config = engine::server_config(&self.settings, &credentials)?;
        self.credentials = Some(credentials);
        self.session = Some(Session::server(config, self.settings.send_buffer_limit())?);
        self.complete_handshake()
    }

    fn complete_handshake(&mut self) -> Result<HandshakeStatus> {
        let Some(session) = self.session.as_mut() else {
            return Err(operation_error(error::NOT_CONNECTED, "no tls session"));
        };
        let deadline = self
            .settings
            .handshake_timeout()
            .map(|timeout| Instant::now() + timeout);
        loop {
            match session.drive_handshake(&mut self.raw)? {
                Progress::Done => {
                    if !self.session_active {
                        self.session_active = true;
                        debug!(fd = self.socket_descriptor, role = ?self.role, "tls handshake complete");
                    }
                    return Ok(HandshakeStatus::Complete);
                }
                Progress::Blocked(op) => {
                    let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
                    match remaining {
                        Some(remaining) if !remaining.is_zero() => {
                            wait_fd(&self.raw, op, Some(remaining))?;
                        }
                        _ => return Ok(HandshakeStatus::Pending),
                    }
                }
            }
        }
    }

    /// 再次推进尚未完成的握手；明文连接直接视为完成。
    pub fn handshake(&mut self) -> Result<HandshakeStatus> {
        if self.aborted {
            return Err(abort_requested());
        }
        if self.settings.mode() == Mode::Plain {
            return Ok(HandshakeStatus::Complete);
        }
        if self.closed {
            return Err(operation_error(error::NOT_CONNECTED, "tls session closed"));
        }
        let status = self.complete_handshake();
        if let Err(err) = &status {
            if err.is_fatal_to_stream() {
                self.aborted = true;
            }
        }
        status
    }

    /// 非阻塞接收。
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if self.aborted {
            return Err(abort_requested());
        }
        if self.closed {
            return Err(operation_error(error::NOT_CONNECTED, "tls session closed"));
        }
        let Some(session) = self.session.as_mut() else {
            return match self.settings.mode() {
                Mode::Plain => self.raw.receive(buf),
                Mode::Secure => Err(operation_error(error::NOT_CONNECTED, "no tls session")),
            };
        };
        let was_handshaking = session.is_handshaking();
        match session.read(&mut self.raw, buf) {
            Ok(outcome) => {
                if was_handshaking && !session.is_handshaking() {
                    self.session_active = true;
                }
                if outcome.is_end_of_stream() {
                    debug!(fd = self.socket_descriptor, ?outcome, "tls peer closed");
                }
                Ok(outcome)
            }
            Err(err) => {
                self.aborted = true;
                error!(fd = self.socket_descriptor, code = err.code(), error = %err, "tls receive failed");
                Err(err)
            }
        }
    }

    /// 发送；返回实际被接受的字节数。
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.aborted {
            return Err(abort_requested());
        }
        if self.closed {
            return Err(operation_error(error::NOT_CONNECTED, "tls session closed"));
        }
        let Some(session) = self.session.as_mut() else {
            return match self.settings.mode() {
                Mode::Plain => self.raw.send(buf),
                Mode::Secure => Err(operation_error(error::NOT_CONNECTED, "no tls session")),
            };
        };
        let was_handshaking = session.is_handshaking();
        match session.write(&mut self.raw, buf) {
            Ok(written) => {
                if was_handshaking && !session.is_handshaking() {
                    self.session_active = true;
                }
                Ok(written)
            }
            Err(err) => {
                self.aborted = true;
                error!(fd = self.socket_descriptor, code = err.code(), error = %err, "tls send failed");
                Err(err)
            }
        }
    }

    /// 明文模式下强制复位连接；TLS 模式下不做任何事。
    pub fn abort(&mut self) -> Result<()> {
        if self.settings.mode() == Mode::Secure {
            return Ok(());
        }
        self.raw.abort()?;
        self.aborted = true;
        debug!(fd = self.socket_descriptor, "plain stream aborted");
        Ok(())
    }

    /// 优雅关闭 TLS 会话；没有活动会话时什么也不做。
    pub fn close_session(&mut self) -> Result<()> {
        if !self.session_active {
            return Ok(());
        }
        self.session_active = false;
        self.closed = true;
        match self.session.as_mut() {
            Some(session) => session.close(&mut self.raw),
            None => Ok(()),
        }
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        self.settings.auth_policy()
    }

    pub fn permitted_peer(&self) -> Option<&str> {
        self.settings.permitted_peer()
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn session_active(&self) -> bool {
        self.session_active
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_handshaking)
    }

    /// 引擎内已解密、尚未交付的明文字节数。
    pub fn buffered_plaintext(&self) -> usize {
        self.session.as_ref().map_or(0, Session::buffered)
    }

    /// 服务端看到的 SNI。
    pub fn negotiated_server_name(&self) -> Option<&str> {
        match self.session.as_ref().map(Session::connection) {
            Some(Connection::Server(conn)) => conn.server_name(),
            _ => None,
        }
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.session
            .as_ref()
            .and_then(|session| session.connection().protocol_version())
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn raw(&self) -> &T {
        &self.raw
    }

    pub fn socket_descriptor(&self) -> RawFd {
        self.socket_descriptor
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.raw.peer_addr()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.raw.local_addr()
    }

    pub fn check_connection(&self) -> bool {
        self.raw.check_connection()
    }

    pub fn set_keep_alive(&mut self, keep_alive: KeepAlive) {
        self.settings.set_keep_alive(keep_alive);
        self.raw.set_keep_alive(keep_alive);
    }

    pub fn enable_keep_alive(&mut self) -> Result<()> {
        self.raw.enable_keep_alive()
    }
}

impl<T: RawTransport> AsFd for TlsStream<T> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.raw.as_fd()
    }
}

impl<T: RawTransport> Drop for TlsStream<T> {
    fn drop(&mut self) {
        if self.aborted {
            return;
        }
        if let Err(err) = self.close_session() {
            warn!(fd = self.socket_descriptor, code = err.code(), error = %err, "tls shutdown failed");
        }
    }
}
