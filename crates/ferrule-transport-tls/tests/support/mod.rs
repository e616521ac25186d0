//! 集成测试共用夹具：测试期生成的 PKI、回环建连与计数传输。
#![allow(dead_code)]

use std::{
    fs,
    os::fd::{AsFd, BorrowedFd},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use ferrule_transport_tls::{
    ConnectTarget, CredentialPaths, KeepAlive, ListenTarget, Mode, RawTransport, ReadOutcome,
    StreamSettings, TcpTransport, TlsStream, WaitOp,
};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SerialNumber, date_time_ymd,
};
use tempfile::TempDir;

pub const SERVER_NAME: &str = "host.example.com";
pub const CLIENT_NAME: &str = "client.example.com";
pub const TIMEOUT: Duration = Duration::from_secs(5);

const REVOKED_SERIAL: &[u8] = &[0x42, 0x17];

/// 证书与私钥在磁盘上的位置。
#[derive(Clone, Debug)]
pub struct Identity {
    pub key: PathBuf,
    pub cert: PathBuf,
}

/// 测试期生成的完整 PKI。
///
/// - `server`/`client`：根 CA 直接签发的终端证书；
/// - `deep_server`：经两级中间 CA 签发，证书文件按“终端、中间 2、中间 1”顺序出示三张证书；
/// - `revoked_server`：被 `crl` 吊销的终端证书；
/// - `foreign_ca`：与上述证书无关的另一个根 CA。
pub struct Pki {
    _dir: TempDir,
    pub ca: PathBuf,
    pub crl: PathBuf,
    pub foreign_ca: PathBuf,
    pub server: Identity,
    pub client: Identity,
    pub deep_server: Identity,
    pub revoked_server: Identity,
}

struct Issuer {
    cert: Certificate,
    key: KeyPair,
}

fn ca_params(common_name: &str) -> anyhow::Result<CertificateParams> {
    let mut params = CertificateParams::new(Vec::<String>::new()).context("ca params")?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Ok(params)
}

fn root(common_name: &str) -> anyhow::Result<Issuer> {
    let key = KeyPair::generate().context("root key")?;
    let cert = ca_params(common_name)?.self_signed(&key).context("root cert")?;
    Ok(Issuer { cert, key })
}

fn intermediate(common_name: &str, issuer: &Issuer) -> anyhow::Result<Issuer> {
    let key = KeyPair::generate().context("intermediate key")?;
    let cert = ca_params(common_name)?
        .signed_by(&key, &issuer.cert, &issuer.key)
        .context("intermediate cert")?;
    Ok(Issuer { cert, key })
}

fn leaf(
    name: &str,
    issuer: &Issuer,
    serial: Option<&[u8]>,
) -> anyhow::Result<(Certificate, KeyPair)> {
    let mut params = CertificateParams::new(vec![name.to_string()]).context("leaf params")?;
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.serial_number = serial.map(SerialNumber::from_slice);
    let key = KeyPair::generate().context("leaf key")?;
    let cert = params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .context("leaf cert")?;
    Ok((cert, key))
}

fn write(dir: &Path, name: &str, contents: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn identity(
    dir: &Path,
    stem: &str,
    chain: &[&Certificate],
    key: &KeyPair,
) -> anyhow::Result<Identity> {
    let pem: String = chain.iter().map(|cert| cert.pem()).collect();
    Ok(Identity {
        key: write(dir, &format!("{stem}.key"), &key.serialize_pem())?,
        cert: write(dir, &format!("{stem}.pem"), &pem)?,
    })
}

impl Pki {
    pub fn generate() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let path = dir.path();

        let ca = root("ferrule test root")?;
        let foreign = root("ferrule foreign root")?;

        let (server_cert, server_key) = leaf(SERVER_NAME, &ca, None)?;
        let (client_cert, client_key) = leaf(CLIENT_NAME, &ca, None)?;
        let (revoked_cert, revoked_key) = leaf(SERVER_NAME, &ca, Some(REVOKED_SERIAL))?;

        let first = intermediate("ferrule intermediate 1", &ca)?;
        let second = intermediate("ferrule intermediate 2", &first)?;
        let (deep_cert, deep_key) = leaf(SERVER_NAME, &second, None)?;

        let crl = CertificateRevocationListParams {
            this_update: date_time_ymd(2024, 1, 1),
            next_update: date_time_ymd(2099, 1, 1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: vec![RevokedCertParams {
                serial_number: SerialNumber::from_slice(REVOKED_SERIAL),
                revocation_time: date_time_ymd(2024, 1, 1),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            }],
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&ca.cert, &ca.key)
        .context("crl")?;

        Ok(Self {
            ca: write(path, "ca.pem", &ca.cert.pem())?,
            crl: write(path, "ca.crl", &crl.pem().context("crl pem")?)?,
            foreign_ca: write(path, "foreign-ca.pem", &foreign.cert.pem())?,
            server: identity(path, "server", &[&server_cert], &server_key)?,
            client: identity(path, "client", &[&client_cert], &client_key)?,
            deep_server: identity(
                path,
                "deep-server",
                &[&deep_cert, &second.cert, &first.cert],
                &deep_key,
            )?,
            revoked_server: identity(path, "revoked-server", &[&revoked_cert], &revoked_key)?,
            _dir: dir,
        })
    }

    pub fn dir(&self) -> &Path {
        self._dir.path()
    }

    /// TLS 模式配置：指定认证策略、身份与信任锚，握手在预算内等待。
    pub fn settings(
        &self,
        auth_mode: &str,
        identity: &Identity,
        ca: &Path,
    ) -> anyhow::Result<StreamSettings> {
        let mut settings = StreamSettings::default();
        settings
            .set_mode(Mode::Secure)
            .set_handshake_timeout(Some(TIMEOUT))
            .set_credentials(
                CredentialPaths::new()
                    .with_key_file(&identity.key)
                    .with_cert_file(&identity.cert)
                    .with_ca_file(ca),
            );
        settings.set_auth_policy(Some(auth_mode))?;
        Ok(settings)
    }

    pub fn server_settings(&self, permitted_peer: Option<&str>) -> anyhow::Result<StreamSettings> {
        let mut settings = self.settings("x509/name", &self.server, &self.ca)?;
        settings.set_permitted_peer(permitted_peer)?;
        Ok(settings)
    }

    pub fn client_settings(&self, permitted_peer: Option<&str>) -> anyhow::Result<StreamSettings> {
        let mut settings = self.settings("x509/name", &self.client, &self.ca)?;
        settings.set_permitted_peer(permitted_peer)?;
        Ok(settings)
    }
}

pub fn plain_settings() -> StreamSettings {
    let mut settings = StreamSettings::default();
    settings.set_mode(Mode::Plain);
    settings
}

pub type Outcome<T> = ferrule_transport_tls::Result<TlsStream<T>>;

/// 在回环地址上完成一次建连：服务端在线程中接受，客户端在当前线程建连。
///
/// 返回 `(客户端结果, 服务端结果)`，两侧失败互不掩盖。
pub fn handshake_pair_with<T>(
    server: StreamSettings,
    client: StreamSettings,
) -> anyhow::Result<(Outcome<T>, Outcome<T>)>
where
    T: RawTransport + Send + 'static,
{
    let listener = TlsStream::<T>::listen(server, &ListenTarget::loopback())?;
    let port = listener
        .local_addr()
        .map(|addr| addr.port())
        .context("listener has a local address")?;
    let acceptor = thread::spawn(move || listener.accept_conn_req());
    let client = TlsStream::<T>::connect(client, &ConnectTarget::new("127.0.0.1", port));
    let server = acceptor
        .join()
        .map_err(|_| anyhow::anyhow!("acceptor thread panicked"))?;
    Ok((client, server))
}

pub fn handshake_pair(
    server: StreamSettings,
    client: StreamSettings,
) -> anyhow::Result<(Outcome<TcpTransport>, Outcome<TcpTransport>)> {
    handshake_pair_with::<TcpTransport>(server, client)
}

/// 建连并断言两侧都成功。
pub fn connected_pair(
    server: StreamSettings,
    client: StreamSettings,
) -> anyhow::Result<(TlsStream, TlsStream)> {
    let (client, server) = handshake_pair(server, client)?;
    Ok((client.context("client side")?, server.context("server side")?))
}

/// 等待可读后接收一次。
pub fn receive_ready<T: RawTransport>(
    stream: &mut TlsStream<T>,
    buf: &mut [u8],
) -> anyhow::Result<ReadOutcome> {
    if stream.buffered_plaintext() == 0 {
        let ready = ferrule_transport_tcp::wait_fd(&*stream, WaitOp::Read, Some(TIMEOUT))?;
        anyhow::ensure!(ready, "stream did not become readable in time");
    }
    Ok(stream.receive(buf)?)
}

/// 持续接收直到凑满 `len` 字节。
pub fn receive_exact<T: RawTransport>(
    stream: &mut TlsStream<T>,
    len: usize,
) -> anyhow::Result<Vec<u8>> {
    let mut collected = Vec::with_capacity(len);
    let mut buf = [0u8; 4096];
    while collected.len() < len {
        match receive_ready(stream, &mut buf)? {
            ReadOutcome::Data(read) => collected.extend_from_slice(&buf[..read]),
            ReadOutcome::Retry => continue,
            ReadOutcome::EndOfStream(end) => anyhow::bail!("stream ended early: {end:?}"),
        }
    }
    Ok(collected)
}

/// 统计发送调用次数的原始传输，用于观察驱动是否触碰网络。
#[derive(Debug)]
pub struct CountingTransport {
    inner: TcpTransport,
    sends: Arc<AtomicUsize>,
}

impl CountingTransport {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn wrap(inner: TcpTransport) -> Self {
        Self {
            inner,
            sends: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AsFd for CountingTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl RawTransport for CountingTransport {
    fn connect(target: &ConnectTarget) -> ferrule_transport_tls::Result<Self> {
        TcpTransport::connect(target).map(Self::wrap)
    }

    fn listen(target: &ListenTarget) -> ferrule_transport_tls::Result<Self> {
        TcpTransport::listen(target).map(Self::wrap)
    }

    fn accept_conn_req(&self) -> ferrule_transport_tls::Result<Self> {
        self.inner.accept_conn_req().map(Self::wrap)
    }

    fn send(&mut self, buf: &[u8]) -> ferrule_transport_tls::Result<usize> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(buf)
    }

    fn receive(&mut self, buf: &mut [u8]) -> ferrule_transport_tls::Result<ReadOutcome> {
        self.inner.receive(buf)
    }

    fn abort(&mut self) -> ferrule_transport_tls::Result<()> {
        self.inner.abort()
    }

    fn set_keep_alive(&mut self, keep_alive: KeepAlive) {
        self.inner.set_keep_alive(keep_alive)
    }

    fn enable_keep_alive(&mut self) -> ferrule_transport_tls::Result<()> {
        self.inner.enable_keep_alive()
    }

    fn check_connection(&self) -> bool {
        self.inner.check_connection()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }
}
