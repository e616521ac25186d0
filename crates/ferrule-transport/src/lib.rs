#![deny(unsafe_code)]
#![doc = "ferrule-transport: 流式传输驱动共享的契约层。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：明文 TCP 驱动与 TLS 驱动共用同一套“原始传输”边界、读结果词汇与错误分类，上层在两种模式之间切换时无需改写调用代码。"]
#![doc = "- **What**：定义 [`RawTransport`]、[`ReadOutcome`]、[`WaitOp`]、连接/监听目标以及结构化的 [`TransportError`]。"]
#![doc = "- **How**：仅依赖标准库与 `thiserror`；所有实现 crate（`ferrule-transport-tcp`、`ferrule-transport-tls`）只需依赖本 crate 即可遵循统一契约。"]

/// 传输层统一返回别名，错误类型固定为 [`TransportError`]。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;

pub mod error;
pub mod io;
pub mod raw;
pub mod target;

pub use error::{ErrorKind, TransportError};
pub use io::{ReadOutcome, StreamEnd, WaitOp};
pub use raw::{KeepAlive, RawTransport};
pub use target::{AddressFamily, ConnectTarget, ListenTarget};
