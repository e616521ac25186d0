//! 证书校验回调。
//!
//! 驱动层策略（链深度上限、认证模式、许可对端）在这里与引擎自身的链校验组合；
//! 链与吊销校验本身交给 `rustls` 的 webpki 校验器完成。

use std::sync::Arc;

use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error, SignatureScheme,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        verify_server_name,
    },
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, ServerName, UnixTime},
    server::{
        ParsedCertificate,
        danger::{ClientCertVerified, ClientCertVerifier},
    },
};
use tracing::warn;

use crate::config::AuthPolicy;

/// 按链顺序逐张检查深度：终端实体为 0，第 i 张中间证书为 i。
///
/// 返回第一张超出上限的证书深度。
pub(crate) fn exceeded_depth(chain_len: usize, bound: Option<usize>) -> Option<usize> {
    let bound = bound?;
    (0..chain_len).find(|depth| *depth > bound)
}

/// 链长度按校验后的完整路径计：出示的证书之外，执行了链校验时信任锚也占一层深度。
fn check_depth(
    intermediates: &[CertificateDer<'_>],
    anchored: bool,
    bound: Option<usize>,
) -> Result<(), Error> {
    let chain_len = intermediates.len() + 1 + usize::from(anchored);
    match exceeded_depth(chain_len, bound) {
        Some(depth) => {
            warn!(depth, bound, "certificate chain exceeds verify depth");
            Err(Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
        None => Ok(()),
    }
}

fn is_name_mismatch(error: &Error) -> bool {
    matches!(
        error,
        Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

/// 客户端校验服务端证书链的回调。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 1. 先执行链深度检查，超限立即失败；除 `anon` 外信任锚计入深度；
/// 2. `anon` 策略到此为止；
/// 3. `x509/certvalid` 执行完整链与吊销校验，仅容忍名称不匹配；
/// 4. `x509/name` 执行完整校验，名称取自建连时设置的服务器名（许可对端或目标主机）。
#[derive(Debug)]
pub(crate) struct ServerChainVerifier {
    policy: AuthPolicy,
    depth_bound: Option<usize>,
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl ServerChainVerifier {
    pub(crate) fn new(
        policy: AuthPolicy,
        depth_bound: Option<usize>,
        inner: Option<Arc<WebPkiServerVerifier>>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            policy,
            depth_bound,
            inner,
            provider,
        }
    }
}

impl ServerCertVerifier for ServerChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let anchored = self.policy != AuthPolicy::None && self.inner.is_some();
        check_depth(intermediates, anchored, self.depth_bound)?;
        let inner = match (self.policy, &self.inner) {
            (AuthPolicy::None, _) => return Ok(ServerCertVerified::assertion()),
            (_, Some(inner)) => inner,
            (_, None) => return Err(Error::InvalidCertificate(CertificateError::UnknownIssuer)),
        };
        let verified =
            inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        match verified {
            Err(err) if self.policy == AuthPolicy::RequireValidCert && is_name_mismatch(&err) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// 服务端校验客户端证书链的回调；客户端证书为必选。
///
/// 只有在 `x509/name` 策略且设置了许可对端时才额外检查终端证书名称。
#[derive(Debug)]
pub(crate) struct ClientChainVerifier {
    depth_bound: Option<usize>,
    permitted_peer: Option<ServerName<'static>>,
    inner: Arc<dyn ClientCertVerifier>,
}

impl ClientChainVerifier {
    pub(crate) fn new(
        depth_bound: Option<usize>,
        permitted_peer: Option<ServerName<'static>>,
        inner: Arc<dyn ClientCertVerifier>,
    ) -> Self {
        Self {
            depth_bound,
            permitted_peer,
            inner,
        }
    }
}

impl ClientCertVerifier for ClientChainVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, Error> {
        check_depth(intermediates, true, self.depth_bound)?;
        let verified = self.inner.verify_client_cert(end_entity, intermediates, now)?;
        if let Some(peer) = &self.permitted_peer {
            let cert = ParsedCertificate::try_from(end_entity)?;
            verify_server_name(&cert, peer).inspect_err(|_| {
                warn!(peer = ?peer, "client certificate does not match the permitted peer");
            })?;
        }
        Ok(verified)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_counted_from_the_end_entity() {
        assert_eq!(exceeded_depth(3, None), None);
        assert_eq!(exceeded_depth(3, Some(2)), None);
        assert_eq!(exceeded_depth(3, Some(1)), Some(2));
        assert_eq!(exceeded_depth(1, Some(1)), None);
    }

    #[test]
    fn trust_anchor_occupies_one_depth() {
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        let intermediates = [cert.clone(), cert];
        assert!(check_depth(&intermediates, false, Some(2)).is_ok());
        assert!(check_depth(&intermediates, true, Some(2)).is_err());
        assert!(check_depth(&intermediates, true, Some(3)).is_ok());
        assert!(check_depth(&intermediates, true, None).is_ok());
    }

    #[test]
    fn only_name_errors_count_as_mismatch() {
        assert!(is_name_mismatch(&Error::InvalidCertificate(
            CertificateError::NotValidForName
        )));
        assert!(!is_name_mismatch(&Error::InvalidCertificate(
            CertificateError::UnknownIssuer
        )));
        assert!(!is_name_mismatch(&Error::HandshakeNotComplete));
    }

    #[test]
    fn anonymous_policy_accepts_without_trust_anchors() {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = ServerChainVerifier::new(AuthPolicy::None, Some(1), None, provider);
        let cert = CertificateDer::from(vec![0x30, 0x00]);
        let name = ServerName::try_from("host.example.com").expect("dns name");
        verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .expect("anon accepts");

        let too_deep = [cert.clone(), cert.clone()];
        let err = verifier
            .verify_server_cert(&cert, &too_deep, &name, &[], UnixTime::now())
            .expect_err("depth is enforced even for anon");
        assert_eq!(
            err,
            Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        );
    }
}
