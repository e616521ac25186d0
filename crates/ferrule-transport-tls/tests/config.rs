//! 配置入口：许可对端策略性质、TOML 文件加载与默认凭据回落。

mod support;

use std::sync::Arc;

use anyhow::Context;
use ferrule_transport_tls::{
    AuthPolicy, CredentialPaths, DriverConfig, ErrorKind, Mode, StreamSettings,
};
use proptest::prelude::*;
use support::{CLIENT_NAME, Pki, SERVER_NAME};

fn policy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("anon"), Just("x509/certvalid"), Just("x509/name")]
}

fn peer_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,9}(\\.[a-z][a-z0-9-]{0,9}){0,3}"
}

proptest! {
    /// 许可对端只在名称策略下被接受；被拒绝时已存值保持不变。
    #[test]
    fn permitted_peer_follows_policy(mode in policy(), peer in peer_name()) {
        let mut settings = StreamSettings::default();
        settings.set_permitted_peer(Some("kept.example.com")).expect("default policy");
        settings.set_auth_policy(Some(mode)).expect("known policy");

        let outcome = settings.set_permitted_peer(Some(&peer)).map(|_| ());
        if settings.auth_policy() == AuthPolicy::RequireValidCertAndName {
            prop_assert!(outcome.is_ok());
            prop_assert_eq!(settings.permitted_peer(), Some(peer.as_str()));
        } else {
            let kind = outcome.err().map(|err| err.kind());
            prop_assert_eq!(kind, Some(ErrorKind::PolicyMismatch));
            prop_assert_eq!(settings.permitted_peer(), Some("kept.example.com"));
        }
    }

    #[test]
    fn wildcard_peers_never_stored(prefix in "[a-z]{0,5}", suffix in peer_name()) {
        let mut settings = StreamSettings::default();
        let peer = format!("{prefix}*.{suffix}");
        let kind = settings.set_permitted_peer(Some(&peer)).err().map(|err| err.kind());
        prop_assert_eq!(kind, Some(ErrorKind::Unsupported));
        prop_assert_eq!(settings.permitted_peer(), None);
    }
}

#[test]
fn driver_config_loads_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ferrule.toml");
    std::fs::write(
        &path,
        r#"
        [defaults]
        ca_file = "/srv/pki/ca.pem"

        [stream]
        mode = 1
        auth_mode = "x509/certvalid"
        verify_depth = 4
        "#,
    )?;

    let settings = DriverConfig::from_path(&path)?.stream_settings()?;
    assert_eq!(settings.mode(), Mode::Secure);
    assert_eq!(settings.auth_policy(), AuthPolicy::RequireValidCert);
    assert_eq!(settings.verify_depth(), Some(4));
    assert_eq!(
        settings.resolved_credentials().ca_file.as_deref(),
        Some(std::path::Path::new("/srv/pki/ca.pem"))
    );
    Ok(())
}

#[test]
fn driver_config_reports_unreadable_and_malformed_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = DriverConfig::from_path(dir.path().join("absent.toml"))
        .err()
        .context("missing file")?;
    assert_eq!(missing.kind(), ErrorKind::Configuration);

    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[stream]\nmode = 1\nunknown_key = true\n")?;
    let malformed = DriverConfig::from_path(&path).err().context("unknown key")?;
    assert_eq!(malformed.kind(), ErrorKind::Configuration);

    std::fs::write(&path, "[stream]\nmode = 7\n")?;
    let invalid = DriverConfig::from_path(&path)?
        .stream_settings()
        .err()
        .context("mode 7")?;
    assert_eq!(invalid.code(), "ferrule.transport.tls.invalid_mode");
    Ok(())
}

/// 连接未单独指定 CA 时回落到进程级默认路径，握手照常完成。
#[test]
fn defaults_supply_missing_credential_paths() -> anyhow::Result<()> {
    let pki = Pki::generate()?;
    let defaults = Arc::new(CredentialPaths::new().with_ca_file(&pki.ca));

    let build = |identity: &support::Identity, peer: &str| -> anyhow::Result<StreamSettings> {
        let mut settings = StreamSettings::new(defaults.clone());
        settings
            .set_mode(Mode::Secure)
            .set_handshake_timeout(Some(support::TIMEOUT))
            .set_credentials(
                CredentialPaths::new()
                    .with_key_file(&identity.key)
                    .with_cert_file(&identity.cert),
            )
            .set_permitted_peer(Some(peer))?;
        Ok(settings)
    };

    let (client, server) = support::connected_pair(
        build(&pki.server, CLIENT_NAME)?,
        build(&pki.client, SERVER_NAME)?,
    )?;
    assert!(client.credentials().is_some_and(|creds| creds.has_ca()));
    assert!(server.session_active());
    Ok(())
}
