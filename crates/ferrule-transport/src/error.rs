use std::{borrow::Cow, error::Error as StdError, io};

use thiserror::Error;

/// 传输错误的粗粒度分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方只需根据分类决定后续动作：配置类错误需要修正配置，握手类错误只影响本次建连，
///   `AbortRequested` 与读写失败意味着该连接已不可用；
/// - 稳定的分类让 TCP 与 TLS 两种驱动在错误语义上保持一致。
///
/// ## 契约（What）
/// - “would block” 从不出现在这里：它由 [`ReadOutcome::Retry`](crate::ReadOutcome::Retry)、
///   握手的 `Pending` 状态或零字节的部分写入表达；
/// - 对端优雅关闭同样不是错误，而是 [`ReadOutcome::EndOfStream`](crate::ReadOutcome::EndOfStream)。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 不支持的模式/策略取值，或配置文件本身无法解析。
    Configuration,
    /// 私钥、证书、CA 或 CRL 文件无法读取或解析。
    Credential,
    /// 在当前认证策略下不允许的设置（例如非 `x509/name` 策略下设置许可对端）。
    PolicyMismatch,
    /// 驱动明确不支持的功能取值。
    Unsupported,
    /// 握手因 would-block 以外的原因失败。
    Handshake,
    /// 连接此前已被标记为中止，本次调用未触碰网络。
    AbortRequested,
    /// 接收路径的致命错误。
    Receive,
    /// 发送路径的致命错误。
    Send,
    /// 其余底层 IO 失败（解析地址、绑定、监听、接受等）。
    Io,
    /// 在尚未建立的连接上执行读写。
    NotConnected,
}

/// 结构化的传输错误：分类 + 稳定错误码 + 文案 + 可选底层原因。
#[derive(Debug, Error)]
#[error("{message} [{code}]")]
pub struct TransportError {
    kind: ErrorKind,
    code: &'static str,
    message: Cow<'static, str>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl TransportError {
    /// 构造不带底层原因的错误。
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            source: None,
        }
    }

    /// 附加底层原因。
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 稳定错误码，形如 `ferrule.transport.tls.handshake_failed`。
    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 若底层原因是 `io::Error`，返回其 `ErrorKind`。
    ///
    /// TLS 驱动的网络回调依赖该方法区分“连接被重置”与一般 IO 失败。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<io::Error>())
            .map(io::Error::kind)
    }

    /// 该错误发生后连接是否应视为不可用。
    pub fn is_fatal_to_stream(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Handshake | ErrorKind::Receive | ErrorKind::Send | ErrorKind::AbortRequested
        )
    }
}
