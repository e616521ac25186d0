//! 安全传输引擎编排：`rustls` 会话、网络回调与配置构建。

use std::{
    io::{self, Read, Write},
    sync::{Arc, OnceLock},
    time::Duration,
};

use ferrule_transport::{ReadOutcome, RawTransport, Result, StreamEnd, TransportError, WaitOp};
use ferrule_transport_tcp::wait_fd;
use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    client::WebPkiServerVerifier,
    crypto::CryptoProvider,
    pki_types::ServerName,
    server::WebPkiClientVerifier,
};
use tracing::{debug, error, trace};

use crate::{
    config::{AuthPolicy, StreamSettings},
    credentials::Credentials,
    error::{self, OperationKind, map_engine_error, map_io_error, operation_error, with_source},
    verify::{ClientChainVerifier, ServerChainVerifier},
};

/// 关闭会话时 would-block 的最大重试次数。
pub const SHUTDOWN_RETRY_LIMIT: usize = 64;

const SHUTDOWN_RETRY_WAIT: Duration = Duration::from_millis(10);

/// 进程内共享的 ring 密码学实现。
pub(crate) fn provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    PROVIDER
        .get_or_init(|| Arc::new(rustls::crypto::ring::default_provider()))
        .clone()
}

/// 网络回调的结果词汇。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NetFault {
    WantRead,
    WantWrite,
    ConnReset,
    RecvFailed,
    SendFailed,
}

impl NetFault {
    fn io_kind(self) -> io::ErrorKind {
        match self {
            NetFault::WantRead | NetFault::WantWrite => io::ErrorKind::WouldBlock,
            NetFault::ConnReset => io::ErrorKind::ConnectionReset,
            NetFault::RecvFailed | NetFault::SendFailed => io::ErrorKind::Other,
        }
    }

    fn classify(source: &TransportError, fallback: NetFault) -> NetFault {
        match source.io_kind() {
            Some(io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe) => NetFault::ConnReset,
            _ => fallback,
        }
    }

    fn into_io(self, source: Option<TransportError>) -> io::Error {
        match source {
            Some(source) => io::Error::new(self.io_kind(), source),
            None => io::Error::from(self.io_kind()),
        }
    }
}

/// 以原始传输实现 `rustls` 所需的 `Read`/`Write`。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 原始层 `Retry` → `WantRead`；发送零字节（缓冲区非空）→ `WantWrite`，二者都表现为 `WouldBlock`；
/// - 原始层结束 → 读到 0 字节，由引擎区分是否收到过 `close_notify`；
/// - 连接重置/管道破裂 → `ConnReset`，其余失败 → `RecvFailed`/`SendFailed`，原始错误保留为 `source`。
pub(crate) struct NetIo<'a, T> {
    raw: &'a mut T,
}

impl<'a, T: RawTransport> NetIo<'a, T> {
    pub(crate) fn new(raw: &'a mut T) -> Self {
        Self { raw }
    }
}

impl<T: RawTransport> Read for NetIo<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.raw.receive(buf) {
            Ok(ReadOutcome::Data(read)) => Ok(read),
            Ok(ReadOutcome::Retry) => Err(NetFault::WantRead.into_io(None)),
            Ok(ReadOutcome::EndOfStream(_)) => Ok(0),
            Err(err) => {
                let fault = NetFault::classify(&err, NetFault::RecvFailed);
                Err(fault.into_io(Some(err)))
            }
        }
    }
}

impl<T: RawTransport> Write for NetIo<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.raw.send(buf) {
            Ok(0) => Err(NetFault::WantWrite.into_io(None)),
            Ok(written) => Ok(written),
            Err(err) => {
                let fault = NetFault::classify(&err, NetFault::SendFailed);
                Err(fault.into_io(Some(err)))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

/// 握手推进一步后的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    Done,
    Blocked(WaitOp),
}

/// 客户端配置：信任锚 + CRL + 校验回调，凭据齐全时出示自身证书。
pub(crate) fn client_config(
    settings: &StreamSettings,
    credentials: &Credentials,
) -> Result<Arc<ClientConfig>> {
    let provider = provider();
    let policy = settings.auth_policy();
    let inner = match (policy, credentials.roots()) {
        (AuthPolicy::None, _) => None,
        (_, Some(roots)) => Some(
            WebPkiServerVerifier::builder_with_provider(roots.clone(), provider.clone())
                .with_crls(credentials.crls().iter().cloned())
                .only_check_end_entity_revocation()
                .allow_unknown_revocation_status()
                .build()
                .map_err(|err| with_source(error::ENGINE_SETUP, "server verifier", err))?,
        ),
        (_, None) => return Err(missing_ca(policy)),
    };
    let verifier = ServerChainVerifier::new(policy, settings.verify_depth(), inner, provider.clone());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| map_engine_error(error::ENGINE_SETUP, err))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));
    let config = match credentials.own_cert() {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|err| map_engine_error(error::CREDENTIAL, err))?,
        None => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// 服务端配置：必须有自身证书与私钥；`anon` 以外的策略要求客户端证书。
pub(crate) fn server_config(
    settings: &StreamSettings,
    credentials: &Credentials,
) -> Result<Arc<ServerConfig>> {
    let provider = provider();
    let policy = settings.auth_policy();
    let (chain, key) = credentials.own_cert().ok_or_else(|| {
        operation_error(error::CREDENTIAL, "server streams need both key and certificate")
    })?;
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|err| map_engine_error(error::ENGINE_SETUP, err))?;
    let builder = if policy == AuthPolicy::None {
        builder.with_no_client_auth()
    } else {
        let roots = credentials.roots().ok_or_else(|| missing_ca(policy))?;
        let inner = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider)
            .with_crls(credentials.crls().iter().cloned())
            .only_check_end_entity_revocation()
            .allow_unknown_revocation_status()
            .build()
            .map_err(|err| with_source(error::ENGINE_SETUP, "client verifier", err))?;
        let permitted_peer = match (policy, settings.permitted_peer()) {
            (AuthPolicy::RequireValidCertAndName, Some(peer)) => Some(server_name(peer)?),
            _ => None,
        };
        builder.with_client_cert_verifier(Arc::new(ClientChainVerifier::new(
            settings.verify_depth(),
            permitted_peer,
            inner,
        )))
    };
    let config = builder
        .with_single_cert(chain, key)
        .map_err(|err| map_engine_error(error::CREDENTIAL, err))?;
    Ok(Arc::new(config))
}

fn missing_ca(policy: AuthPolicy) -> TransportError {
    operation_error(
        error::CONFIG,
        format!("auth mode {} requires a CA file", policy.as_str()),
    )
}

pub(crate) fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_owned())
        .map_err(|err| with_source(error::CONFIG, format!("invalid peer name '{name}'"), err))
}

/// 一个连接独占的引擎状态。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 原始套接字的就绪状态看不到引擎内部已解密但未交付的明文；
///   `buffered` 缓存这部分字节数，供多路复用器判断“无需轮询即已就绪”。
///
/// ## 逻辑（How）
/// - 每次 `process_new_packets` 之后以 `IoState::plaintext_bytes_to_read` 刷新 `buffered`；
/// - 每次向调用方交付明文后扣减实际交付的字节数。
///
/// ## 契约（What）
/// - 读路径：先交付已缓冲明文，再从网络读取并解密；would-block 表现为 `Retry`；
/// - 写路径：明文被引擎接受后在内部等待写就绪直至密文全部写出，返回实际接受的字节数；
/// - 关闭：发送 `close_notify`，would-block 最多重试 [`SHUTDOWN_RETRY_LIMIT`] 次。
#[derive(Debug)]
pub(crate) struct Session {
    conn: Connection,
    buffered: usize,
}

impl Session {
    pub(crate) fn client(
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
        buffer_limit: Option<usize>,
    ) -> Result<Self> {
        let conn = ClientConnection::new(config, name)
            .map_err(|err| map_engine_error(error::ENGINE_SETUP, err))?;
        Ok(Self::with_limit(Connection::Client(conn), buffer_limit))
    }

    pub(crate) fn server(config: Arc<ServerConfig>, buffer_limit: Option<usize>) -> Result<Self> {
        let conn = ServerConnection::new(config)
            .map_err(|err| map_engine_error(error::ENGINE_SETUP, err))?;
        Ok(Self::with_limit(Connection::Server(conn), buffer_limit))
    }

    fn with_limit(mut conn: Connection, buffer_limit: Option<usize>) -> Self {
        if let Some(limit) = buffer_limit {
            conn.set_buffer_limit(Some(limit));
        }
        Self { conn, buffered: 0 }
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffered
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// 推进握手直到完成或遇到 would-block。
    pub(crate) fn drive_handshake<T: RawTransport>(&mut self, raw: &mut T) -> Result<Progress> {
        loop {
            if self.flush(raw, error::HANDSHAKE)? {
                return Ok(Progress::Blocked(WaitOp::Write));
            }
            if !self.conn.is_handshaking() {
                return Ok(Progress::Done);
            }
            match self.conn.read_tls(&mut NetIo::new(raw)) {
                Ok(0) => {
                    return Err(operation_error(
                        error::HANDSHAKE,
                        "peer closed the connection during handshake",
                    ));
                }
                Ok(_) => self.process(raw, error::HANDSHAKE)?,
                Err(err) if would_block(&err) => return Ok(Progress::Blocked(WaitOp::Read)),
                Err(err) => return Err(map_io_error(error::HANDSHAKE, err)),
            }
        }
    }

    /// 读取明文；未完成的握手会被隐式推进。
    pub(crate) fn read<T: RawTransport>(&mut self, raw: &mut T, buf: &mut [u8]) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => return Ok(ReadOutcome::EndOfStream(StreamEnd::CloseNotify)),
                Ok(read) => {
                    self.buffered = self.buffered.saturating_sub(read);
                    return Ok(ReadOutcome::Data(read));
                }
                Err(err) if would_block(&err) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(ReadOutcome::EndOfStream(StreamEnd::Eof));
                }
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
            self.flush(raw, error::READ)?;
            match self.conn.read_tls(&mut NetIo::new(raw)) {
                Ok(_) => self.process(raw, error::READ)?,
                Err(err) if would_block(&err) => return Ok(ReadOutcome::Retry),
                Err(err) => return Err(map_io_error(error::READ, err)),
            }
        }
    }

    /// 写入明文；would-block 在内部等待写就绪后重试，不返回给调用方。
    pub(crate) fn write<T: RawTransport>(&mut self, raw: &mut T, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.conn.is_handshaking() {
            match self.drive_handshake(raw)? {
                Progress::Done => break,
                Progress::Blocked(op) => wait_fd(&*raw, op, None)?,
            };
        }
        loop {
            let accepted = self
                .conn
                .writer()
                .write(buf)
                .map_err(|err| map_io_error(error::WRITE, err))?;
            self.flush_blocking(raw)?;
            if accepted > 0 {
                trace!(requested = buf.len(), accepted, "tls record written");
                return Ok(accepted);
            }
        }
    }

    /// 发送 `close_notify` 并在有限次数内写出。
    pub(crate) fn close<T: RawTransport>(&mut self, raw: &mut T) -> Result<()> {
        self.conn.send_close_notify();
        let mut retries = 0;
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut NetIo::new(raw)) {
                Ok(_) => {}
                Err(err) if would_block(&err) && retries < SHUTDOWN_RETRY_LIMIT => {
                    retries += 1;
                    wait_fd(&*raw, WaitOp::Write, Some(SHUTDOWN_RETRY_WAIT))?;
                }
                Err(err) => return Err(map_io_error(error::SHUTDOWN, err)),
            }
        }
        debug!(retries, "close_notify sent");
        Ok(())
    }

    /// 非阻塞地写出待发送密文；返回 `true` 表示仍被 would-block 挡住。
    fn flush<T: RawTransport>(&mut self, raw: &mut T, op: OperationKind) -> Result<bool> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut NetIo::new(raw)) {
                Ok(_) => {}
                Err(err) if would_block(&err) => return Ok(true),
                Err(err) => return Err(map_io_error(op, err)),
            }
        }
        Ok(false)
    }

    fn flush_blocking<T: RawTransport>(&mut self, raw: &mut T) -> Result<()> {
        while self.flush(raw, error::WRITE)? {
            wait_fd(&*raw, WaitOp::Write, None)?;
        }
        Ok(())
    }

    fn process<T: RawTransport>(&mut self, raw: &mut T, op: OperationKind) -> Result<()> {
        match self.conn.process_new_packets() {
            Ok(state) => {
                self.buffered = state.plaintext_bytes_to_read();
                Ok(())
            }
            Err(err) => {
                // 尽力把引擎排队的告警送达对端。
                if let Err(flush_err) = self.flush(raw, op) {
                    debug!(code = flush_err.code(), error = %flush_err, "tls alert not delivered");
                }
                error!(code = op.code, diagnostic = ?err, "tls engine error: {err}");
                Err(map_engine_error(op, err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_faults_map_to_io_kinds() {
        assert_eq!(NetFault::WantRead.io_kind(), io::ErrorKind::WouldBlock);
        assert_eq!(NetFault::WantWrite.io_kind(), io::ErrorKind::WouldBlock);
        assert_eq!(NetFault::ConnReset.io_kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(NetFault::RecvFailed.io_kind(), io::ErrorKind::Other);
    }

    #[test]
    fn reset_sources_are_classified_as_conn_reset() {
        let reset = TransportError::new(ferrule_transport::ErrorKind::Receive, "t", "reset")
            .with_source(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            NetFault::classify(&reset, NetFault::RecvFailed),
            NetFault::ConnReset
        );

        let other = TransportError::new(ferrule_transport::ErrorKind::Receive, "t", "other");
        assert_eq!(
            NetFault::classify(&other, NetFault::RecvFailed),
            NetFault::RecvFailed
        );
    }

    #[test]
    fn provider_is_shared() {
        assert!(Arc::ptr_eq(&provider(), &provider()));
    }

    #[test]
    fn non_anonymous_policies_need_a_ca() {
        let mut settings = StreamSettings::default();
        settings
            .set_auth_policy(Some("x509/certvalid"))
            .expect("policy");
        let err = client_config(&settings, &Credentials::default()).expect_err("no ca");
        assert_eq!(err.kind(), ferrule_transport::ErrorKind::Configuration);

        let err = server_config(&settings, &Credentials::default()).expect_err("no cert");
        assert_eq!(err.kind(), ferrule_transport::ErrorKind::Credential);
    }

    #[test]
    fn anonymous_clients_need_no_material() {
        let mut settings = StreamSettings::default();
        settings.set_auth_policy(Some("anon")).expect("policy");
        client_config(&settings, &Credentials::default()).expect("anon client");
    }
}
