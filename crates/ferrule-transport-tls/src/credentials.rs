use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use ferrule_transport::{Result, TransportError};
use rustls::RootCertStore;
use rustls_pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, pem::PemObject,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::{self, operation_error, with_source};

/// 私钥、证书链、CA 与 CRL 的文件路径；任一字段为空时回落到进程级默认值。
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CredentialPaths {
    pub key_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub crl_file: Option<PathBuf>,
}

impl CredentialPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = Some(path.into());
        self
    }

    pub fn with_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(path.into());
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_crl_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.crl_file = Some(path.into());
        self
    }

    /// 逐字段回落：本实例未设置的路径取 `defaults` 中的值。
    pub fn resolve(&self, defaults: &CredentialPaths) -> CredentialPaths {
        CredentialPaths {
            key_file: self.key_file.clone().or_else(|| defaults.key_file.clone()),
            cert_file: self.cert_file.clone().or_else(|| defaults.cert_file.clone()),
            ca_file: self.ca_file.clone().or_else(|| defaults.ca_file.clone()),
            crl_file: self.crl_file.clone().or_else(|| defaults.crl_file.clone()),
        }
    }
}

/// 单个连接持有的凭据材料。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 凭据在建连/接受时按需加载，随连接一起释放；连接之间只共享只读的默认路径快照；
/// - 任何文件解析失败都在握手前暴露为 [`ErrorKind::Credential`](ferrule_transport::ErrorKind::Credential)，
///   连接不会带着残缺的信任配置进入握手。
///
/// ## 契约（What）
/// - 证书文件至少包含一张证书，CRL 文件至少包含一份吊销列表；
/// - CA 文件中的每张证书都必须能加入信任锚集合；
/// - [`own_cert`](Self::own_cert) 仅在私钥与证书同时存在时返回。
///
/// ## 风险与权衡（Trade-offs）
/// - 私钥以 DER 形式常驻内存直到连接释放，`Debug` 输出不包含任何密钥内容。
#[derive(Default)]
pub struct Credentials {
    key: Option<PrivateKeyDer<'static>>,
    cert_chain: Vec<CertificateDer<'static>>,
    roots: Option<Arc<RootCertStore>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
}

impl Credentials {
    /// 按路径加载全部凭据；未设置的路径直接跳过。
    pub fn load(paths: &CredentialPaths) -> Result<Self> {
        let loaded = Self::load_inner(paths);
        if let Err(err) = &loaded {
            error!(code = err.code(), error = %err, "error parsing crypto config");
        }
        loaded
    }

    fn load_inner(paths: &CredentialPaths) -> Result<Self> {
        let mut credentials = Credentials::default();
        if let Some(path) = &paths.key_file {
            credentials.key = Some(
                PrivateKeyDer::from_pem_file(path)
                    .map_err(|err| with_source(error::CREDENTIAL, describe(path, "private key"), err))?,
            );
        }
        if let Some(path) = &paths.cert_file {
            credentials.cert_chain = load_certificates(path)?;
        }
        if let Some(path) = &paths.ca_file {
            let mut roots = RootCertStore::empty();
            for cert in load_certificates(path)? {
                roots.add(cert).map_err(|err| {
                    with_source(error::CREDENTIAL, describe(path, "trust anchor"), err)
                })?;
            }
            credentials.roots = Some(Arc::new(roots));
        }
        if let Some(path) = &paths.crl_file {
            credentials.crls = load_crls(path)?;
        }
        debug!(
            key = credentials.has_key(),
            certs = credentials.cert_chain.len(),
            ca = credentials.roots.is_some(),
            crls = credentials.crls.len(),
            "credentials loaded"
        );
        Ok(credentials)
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn has_cert(&self) -> bool {
        !self.cert_chain.is_empty()
    }

    pub fn has_ca(&self) -> bool {
        self.roots.is_some()
    }

    pub fn has_crl(&self) -> bool {
        !self.crls.is_empty()
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub fn roots(&self) -> Option<&Arc<RootCertStore>> {
        self.roots.as_ref()
    }

    pub fn crls(&self) -> &[CertificateRevocationListDer<'static>] {
        &self.crls
    }

    /// 自身证书链与私钥的副本；缺任意一项时返回 `None`。
    pub fn own_cert(&self) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        match &self.key {
            Some(key) if self.has_cert() => Some((self.cert_chain.clone(), key.clone_key())),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.has_key())
            .field("cert_chain", &self.cert_chain.len())
            .field("roots", &self.roots.as_ref().map(|roots| roots.len()))
            .field("crls", &self.crls.len())
            .finish()
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|err| with_source(error::CREDENTIAL, describe(path, "certificate"), err))?;
    if certs.is_empty() {
        return Err(empty(path, "certificate"));
    }
    Ok(certs)
}

fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let crls = CertificateRevocationListDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(|err| with_source(error::CREDENTIAL, describe(path, "revocation list"), err))?;
    if crls.is_empty() {
        return Err(empty(path, "revocation list"));
    }
    Ok(crls)
}

fn describe(path: &Path, what: &str) -> String {
    format!("{what} file {}", path.display())
}

fn empty(path: &Path, what: &str) -> TransportError {
    operation_error(error::CREDENTIAL, format!("no {what} found in {}", path.display()))
}
