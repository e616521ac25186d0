use std::{error::Error as StdError, fmt::Display, io};

use ferrule_transport::{ErrorKind, TransportError};

/// TLS 驱动的错误码表。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将配置、凭据、握手与读写失败统一映射为带稳定错误码的 [`TransportError`]，
///   运维脚本与测试只需比对错误码，而无需解析 `rustls` 的文案；
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作的错误码、默认文案与分类；
/// - `operation_error` 用于纯逻辑错误，`map_engine_error`/`map_io_error` 额外保留底层原因。
///
/// ## 契约（What）
/// - would-block 从不经过这里；
/// - `map_io_error` 会保留网络回调中嵌套的原始传输错误，便于定位“连接重置”等底层原因。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
    pub kind: ErrorKind,
}

pub(crate) const INVALID_MODE: OperationKind = OperationKind {
    code: "ferrule.transport.tls.invalid_mode",
    message: "unsupported driver mode",
    kind: ErrorKind::Configuration,
};

pub(crate) const INVALID_AUTH_MODE: OperationKind = OperationKind {
    code: "ferrule.transport.tls.invalid_auth_mode",
    message: "unsupported authentication mode",
    kind: ErrorKind::Configuration,
};

pub(crate) const PEER_POLICY: OperationKind = OperationKind {
    code: "ferrule.transport.tls.permitted_peer_policy",
    message: "permitted peer not allowed in this authentication mode",
    kind: ErrorKind::PolicyMismatch,
};

pub(crate) const UNSUPPORTED: OperationKind = OperationKind {
    code: "ferrule.transport.tls.unsupported",
    message: "not supported by the tls driver",
    kind: ErrorKind::Unsupported,
};

pub(crate) const CONFIG: OperationKind = OperationKind {
    code: "ferrule.transport.tls.config_invalid",
    message: "invalid driver configuration",
    kind: ErrorKind::Configuration,
};

pub(crate) const CREDENTIAL: OperationKind = OperationKind {
    code: "ferrule.transport.tls.credential_invalid",
    message: "error parsing crypto config",
    kind: ErrorKind::Credential,
};

pub(crate) const ENGINE_SETUP: OperationKind = OperationKind {
    code: "ferrule.transport.tls.engine_setup_failed",
    message: "tls engine setup",
    kind: ErrorKind::Configuration,
};

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "ferrule.transport.tls.handshake_failed",
    message: "tls handshake",
    kind: ErrorKind::Handshake,
};

pub(crate) const READ: OperationKind = OperationKind {
    code: "ferrule.transport.tls.read_failed",
    message: "tls read",
    kind: ErrorKind::Receive,
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "ferrule.transport.tls.write_failed",
    message: "tls write",
    kind: ErrorKind::Send,
};

pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: "ferrule.transport.tls.shutdown_failed",
    message: "tls shutdown",
    kind: ErrorKind::Io,
};

pub(crate) const ABORTED: OperationKind = OperationKind {
    code: "ferrule.transport.tls.abort_requested",
    message: "connection abort requested",
    kind: ErrorKind::AbortRequested,
};

pub(crate) const NOT_CONNECTED: OperationKind = OperationKind {
    code: "ferrule.transport.tls.not_connected",
    message: "stream has no connected peer",
    kind: ErrorKind::NotConnected,
};

/// 构造不带底层原因的错误。
pub(crate) fn operation_error(op: OperationKind, detail: impl Display) -> TransportError {
    TransportError::new(op.kind, op.code, format!("{}: {}", op.message, detail))
}

/// 构造错误并保留底层原因。
pub(crate) fn with_source<E>(op: OperationKind, detail: impl Display, source: E) -> TransportError
where
    E: StdError + Send + Sync + 'static,
{
    operation_error(op, detail).with_source(source)
}

/// 将 `rustls` 错误映射为结构化错误；文案保留引擎自身的诊断文本。
pub(crate) fn map_engine_error(op: OperationKind, error: rustls::Error) -> TransportError {
    let detail = error.to_string();
    with_source(op, detail, error)
}

/// 将网络回调返回的 IO 错误映射为结构化错误。
pub(crate) fn map_io_error(op: OperationKind, error: io::Error) -> TransportError {
    let detail = error.to_string();
    with_source(op, detail, error)
}

/// 已中止连接上的读写请求。
pub(crate) fn abort_requested() -> TransportError {
    operation_error(ABORTED, "stream was aborted after a fatal error")
}
