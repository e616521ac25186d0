#![doc = r#"
# ferrule-transport-tls

## 设计动机（Why）
- **定位**：在 [`RawTransport`](ferrule_transport::RawTransport) 之上提供可在明文与 TLS 之间切换的流驱动，
  以及能感知“引擎内已缓冲明文”的就绪多路复用器。
- **难点**：TLS 记录层会一次解密出多于调用方所取的明文，这部分数据对套接字级的 `poll(2)` 不可见；
  多路复用器必须自行记账，否则调用方会永久阻塞在一次不会到来的读就绪上。

## 核心契约（What）
- [`TlsStream`]：connect/listen/accept、非阻塞 send/receive、abort 与优雅关闭；
- [`TlsSelector`]：按周期登记 → 等待 → 逐个查询，缓冲明文优先于原始轮询；
- [`StreamSettings`] / [`DriverConfig`]：模式、认证策略、许可对端、链深度与凭据路径；
- [`Credentials`] / [`CredentialPaths`]：按需加载的私钥、证书、CA 与 CRL。

## 实现策略（How）
- 安全传输引擎为同步 API 的 `rustls`（ring 密码学实现），网络回调直接驱动原始传输；
- 证书校验回调先执行链深度上限，再交给 webpki 完成链、吊销与名称校验；
- would-block 从不以错误形式出现：接收返回 `Retry`，握手返回 `Pending`，发送在内部等待。

## 风险与考量（Trade-offs）
- 单线程、同步、非阻塞模型，连接本身不加锁；
- 只支持一个许可对端，多余的配置项会被告警并截断。
"#]

mod config;
mod credentials;
mod engine;
mod error;
mod select;
mod stream;
mod verify;

pub use config::{AuthPolicy, DriverConfig, KeepAliveSection, Mode, StreamSection, StreamSettings};
pub use credentials::{CredentialPaths, Credentials};
pub use engine::SHUTDOWN_RETRY_LIMIT;
pub use ferrule_transport::{
    AddressFamily, ConnectTarget, ErrorKind, KeepAlive, ListenTarget, RawTransport, ReadOutcome,
    Result, StreamEnd, TransportError, WaitOp,
};
pub use ferrule_transport_tcp::TcpTransport;
pub use rustls::ProtocolVersion;
pub use select::TlsSelector;
pub use stream::{HandshakeStatus, Role, TlsStream};
