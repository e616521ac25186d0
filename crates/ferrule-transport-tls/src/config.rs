use std::{fs, path::Path, sync::Arc, time::Duration};

use ferrule_transport::{KeepAlive, Result, TransportError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    credentials::CredentialPaths,
    error::{self, operation_error, with_source},
};

/// 驱动模式：明文透传或 TLS。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Plain,
    Secure,
}

impl TryFrom<i64> for Mode {
    type Error = TransportError;

    /// 只接受 `0`（明文）与 `1`（TLS）。
    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Mode::Plain),
            1 => Ok(Mode::Secure),
            other => Err(operation_error(
                error::INVALID_MODE,
                format!("driver mode {other} not supported"),
            )),
        }
    }
}

/// 对端证书的认证策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AuthPolicy {
    /// `anon`：不做任何证书检查。
    None,
    /// `x509/certvalid`：只校验证书链。
    RequireValidCert,
    /// `x509/name`（默认）：校验证书链并匹配名称。
    #[default]
    RequireValidCertAndName,
}

impl AuthPolicy {
    /// 解析策略标识，大小写不敏感；`None` 等价于 `x509/name`。
    pub fn parse(identifier: Option<&str>) -> Result<Self> {
        let Some(identifier) = identifier else {
            return Ok(AuthPolicy::RequireValidCertAndName);
        };
        if identifier.eq_ignore_ascii_case("x509/name") {
            Ok(AuthPolicy::RequireValidCertAndName)
        } else if identifier.eq_ignore_ascii_case("x509/certvalid") {
            Ok(AuthPolicy::RequireValidCert)
        } else if identifier.eq_ignore_ascii_case("anon") {
            Ok(AuthPolicy::None)
        } else {
            Err(operation_error(
                error::INVALID_AUTH_MODE,
                format!("authentication mode '{identifier}' not supported"),
            ))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPolicy::None => "anon",
            AuthPolicy::RequireValidCert => "x509/certvalid",
            AuthPolicy::RequireValidCertAndName => "x509/name",
        }
    }
}

/// 单个连接的配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 所有“必须在建连/接受之前设置”的参数集中在这里；连接创建时按值移入，
///   之后再无修改入口，从结构上保证“建连后设置无效”。
///
/// ## 逻辑（How）
/// - 设置函数逐项校验：模式与策略取值、许可对端与策略的搭配、以及明确不支持的功能开关；
/// - 监听连接把自身配置整体复制给每个接受得到的子连接。
///
/// ## 契约（What）
/// - `set_permitted_peer` 只在 `x509/name` 策略下接受标识，否则返回
///   [`ErrorKind::PolicyMismatch`](ferrule_transport::ErrorKind::PolicyMismatch) 且不修改已存值；
/// - 只保存一个许可对端：再次设置会替换旧值并告警，列表形式只取第一个；
/// - `verify_depth` 为 0 表示不限制链深度。
#[derive(Clone, Debug, Default)]
pub struct StreamSettings {
    mode: Mode,
    auth_policy: AuthPolicy,
    permitted_peer: Option<String>,
    verify_depth: Option<usize>,
    credentials: CredentialPaths,
    defaults: Arc<CredentialPaths>,
    handshake_timeout: Option<Duration>,
    send_buffer_limit: Option<usize>,
    keep_alive: KeepAlive,
}

impl StreamSettings {
    /// 以共享的默认凭据路径快照创建配置。
    pub fn new(defaults: Arc<CredentialPaths>) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn set_mode(&mut self, mode: Mode) -> &mut Self {
        debug!(?mode, "driver mode set");
        self.mode = mode;
        self
    }

    pub fn set_auth_policy(&mut self, identifier: Option<&str>) -> Result<&mut Self> {
        self.auth_policy = AuthPolicy::parse(identifier)?;
        debug!(policy = self.auth_policy.as_str(), "authentication mode set");
        Ok(self)
    }

    /// 设置唯一的许可对端；`None` 清除已存值。
    pub fn set_permitted_peer(&mut self, peer: Option<&str>) -> Result<&mut Self> {
        let Some(peer) = peer else {
            self.permitted_peer = None;
            return Ok(self);
        };
        self.check_peer(peer)?;
        if let Some(previous) = self.permitted_peer.as_deref().filter(|prev| *prev != peer) {
            warn!(
                previous,
                peer, "only one permitted peer is supported, replacing the stored one"
            );
        }
        self.permitted_peer = Some(peer.to_owned());
        Ok(self)
    }

    /// 以列表形式设置许可对端；多于一个时只保留第一个并告警。
    pub fn set_permitted_peers<S: AsRef<str>>(&mut self, peers: &[S]) -> Result<&mut Self> {
        let Some(first) = peers.first() else {
            self.permitted_peer = None;
            return Ok(self);
        };
        let first = first.as_ref();
        self.check_peer(first)?;
        if peers.len() > 1 {
            warn!(
                configured = peers.len(),
                kept = first,
                "only one permitted peer is supported, extra entries ignored"
            );
        }
        self.permitted_peer = Some(first.to_owned());
        Ok(self)
    }

    fn check_peer(&self, peer: &str) -> Result<()> {
        if self.auth_policy != AuthPolicy::RequireValidCertAndName {
            return Err(operation_error(
                error::PEER_POLICY,
                format!("current mode is {}", self.auth_policy.as_str()),
            ));
        }
        if peer.contains('*') {
            return Err(operation_error(
                error::UNSUPPORTED,
                format!("wildcard permitted peer '{peer}', only plain text identifiers are supported"),
            ));
        }
        Ok(())
    }

    /// 证书链深度上限；0 表示不限制。
    pub fn set_verify_depth(&mut self, depth: usize) -> &mut Self {
        self.verify_depth = (depth > 0).then_some(depth);
        self
    }

    pub fn set_credentials(&mut self, paths: CredentialPaths) -> &mut Self {
        self.credentials = paths;
        self
    }

    pub fn set_defaults(&mut self, defaults: Arc<CredentialPaths>) -> &mut Self {
        self.defaults = defaults;
        self
    }

    /// 过期证书永不允许；仅接受 `off`。
    pub fn set_permit_expired_certs(&mut self, mode: Option<&str>) -> Result<&mut Self> {
        match mode {
            None => Ok(self),
            Some(mode) if mode.eq_ignore_ascii_case("off") => Ok(self),
            Some(mode) => Err(operation_error(
                error::UNSUPPORTED,
                format!("permitexpiredcerts mode '{mode}'"),
            )),
        }
    }

    /// 不支持密码套件优先级字符串。
    pub fn set_priority_string(&mut self, priority: Option<&str>) -> Result<&mut Self> {
        match priority {
            None => Ok(self),
            Some(priority) => Err(operation_error(
                error::UNSUPPORTED,
                format!("priority string '{priority}'"),
            )),
        }
    }

    /// 扩展密钥用途检查始终开启。
    pub fn set_check_extended_key_usage(&mut self, enabled: bool) -> &mut Self {
        if !enabled {
            warn!("extended key usage is always checked, setting ignored");
        }
        self
    }

    /// 名称匹配始终优先使用 SAN。
    pub fn set_prioritize_san(&mut self, enabled: bool) -> &mut Self {
        if !enabled {
            warn!("subject alternative names are always preferred, setting ignored");
        }
        self
    }

    pub fn set_handshake_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn set_send_buffer_limit(&mut self, limit: Option<usize>) -> &mut Self {
        self.send_buffer_limit = limit;
        self
    }

    pub fn set_keep_alive(&mut self, keep_alive: KeepAlive) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        self.auth_policy
    }

    pub fn permitted_peer(&self) -> Option<&str> {
        self.permitted_peer.as_deref()
    }

    pub fn verify_depth(&self) -> Option<usize> {
        self.verify_depth
    }

    pub fn credentials(&self) -> &CredentialPaths {
        &self.credentials
    }

    pub fn defaults(&self) -> &Arc<CredentialPaths> {
        &self.defaults
    }

    /// 本连接最终使用的凭据路径（已按字段回落到默认值）。
    pub fn resolved_credentials(&self) -> CredentialPaths {
        self.credentials.resolve(&self.defaults)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    pub fn send_buffer_limit(&self) -> Option<usize> {
        self.send_buffer_limit
    }

    pub fn keep_alive(&self) -> KeepAlive {
        self.keep_alive
    }
}

/// TOML 形式的驱动配置文件。
///
/// ```toml
/// [defaults]
/// ca_file = "/etc/ferrule/ca.pem"
///
/// [stream]
/// mode = 1
/// auth_mode = "x509/name"
/// permitted_peers = ["host.example.com"]
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub defaults: CredentialPaths,
    pub stream: StreamSection,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamSection {
    pub mode: i64,
    pub auth_mode: Option<String>,
    pub permitted_peers: Vec<String>,
    pub verify_depth: usize,
    pub key_file: Option<std::path::PathBuf>,
    pub cert_file: Option<std::path::PathBuf>,
    pub ca_file: Option<std::path::PathBuf>,
    pub crl_file: Option<std::path::PathBuf>,
    pub permit_expired_certs: Option<String>,
    pub priority_string: Option<String>,
    pub check_extended_key_usage: Option<bool>,
    pub prioritize_san: Option<bool>,
    pub handshake_timeout_ms: Option<u64>,
    pub send_buffer_limit: Option<usize>,
    pub keep_alive: KeepAliveSection,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeepAliveSection {
    pub time_secs: Option<u64>,
    pub interval_secs: Option<u64>,
    pub probes: Option<u32>,
}

impl From<KeepAliveSection> for KeepAlive {
    fn from(section: KeepAliveSection) -> Self {
        KeepAlive {
            time: section.time_secs.map(Duration::from_secs),
            interval: section.interval_secs.map(Duration::from_secs),
            probes: section.probes,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|err| with_source(error::CONFIG, "malformed toml", err))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| {
            with_source(error::CONFIG, format!("cannot read {}", path.display()), err)
        })?;
        Self::from_toml_str(&source)
    }

    /// 逐个调用设置函数构建连接配置，校验与告警和编程式配置完全一致。
    pub fn stream_settings(&self) -> Result<StreamSettings> {
        let stream = &self.stream;
        let mut settings = StreamSettings::new(Arc::new(self.defaults.clone()));
        settings.set_mode(Mode::try_from(stream.mode)?);
        settings
            .set_auth_policy(stream.auth_mode.as_deref())?
            .set_permitted_peers(&stream.permitted_peers)?
            .set_permit_expired_certs(stream.permit_expired_certs.as_deref())?
            .set_priority_string(stream.priority_string.as_deref())?;
        if let Some(enabled) = stream.check_extended_key_usage {
            settings.set_check_extended_key_usage(enabled);
        }
        if let Some(enabled) = stream.prioritize_san {
            settings.set_prioritize_san(enabled);
        }
        settings
            .set_verify_depth(stream.verify_depth)
            .set_credentials(CredentialPaths {
                key_file: stream.key_file.clone(),
                cert_file: stream.cert_file.clone(),
                ca_file: stream.ca_file.clone(),
                crl_file: stream.crl_file.clone(),
            })
            .set_handshake_timeout(stream.handshake_timeout_ms.map(Duration::from_millis))
            .set_send_buffer_limit(stream.send_buffer_limit)
            .set_keep_alive(stream.keep_alive.into());
        Ok(settings)
    }
}
