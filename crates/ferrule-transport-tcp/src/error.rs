use ferrule_transport::{ErrorKind, TransportError};
use std::io;

/// 描述一次底层操作对应的稳定错误码、默认文案与错误分类。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
    pub kind: ErrorKind,
}

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.resolve_failed",
    message: "tcp resolve",
    kind: ErrorKind::Io,
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.bind_failed",
    message: "tcp bind",
    kind: ErrorKind::Io,
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.accept_failed",
    message: "tcp accept",
    kind: ErrorKind::Io,
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.connect_failed",
    message: "tcp connect",
    kind: ErrorKind::Io,
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.read_failed",
    message: "tcp read",
    kind: ErrorKind::Receive,
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.write_failed",
    message: "tcp write",
    kind: ErrorKind::Send,
};
pub(crate) const ABORT: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.abort_failed",
    message: "tcp abort",
    kind: ErrorKind::Io,
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.configure_failed",
    message: "tcp configure",
    kind: ErrorKind::Io,
};
pub(crate) const POLL: OperationKind = OperationKind {
    code: "ferrule.transport.tcp.poll_failed",
    message: "tcp poll",
    kind: ErrorKind::Io,
};

/// 将 IO 错误映射为结构化的 [`TransportError`]，并保留原始错误作为 `source`。
pub(crate) fn map_io_error(op: OperationKind, error: io::Error) -> TransportError {
    TransportError::new(op.kind, op.code, format!("{}: {}", op.message, error)).with_source(error)
}

/// 构造不带底层 IO 原因的错误。
pub(crate) fn operation_error(op: OperationKind, detail: &str) -> TransportError {
    TransportError::new(op.kind, op.code, format!("{}: {}", op.message, detail))
}

/// 判断 IO 错误是否只是暂时无法推进。
pub(crate) fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
