#![doc = r#"
# ferrule-transport-tcp

## 设计动机（Why）
- **定位**：提供 [`RawTransport`](ferrule_transport::RawTransport) 的 TCP 实现，以及与之配套的
  水平触发就绪原语，是 TLS 驱动唯一的“字节管道”。
- **架构角色**：位于契约层之上、TLS 驱动之下；明文模式下 TLS 驱动对本 crate 纯透传，
  因此这里的行为即明文模式的全部语义。

## 核心契约（What）
- [`TcpTransport`]：建连/监听/接受、非阻塞收发、强制复位、保活与存活探测；
- [`PollSelector`]：按周期登记 `(描述符, 方向)`，一次 `poll(2)` 等待，随后逐个查询就绪；
- [`wait_fd`]：单描述符等待，供握手在预算内等待网络事件。

## 实现策略（How）
- 套接字选项统一走 `socket2`；`poll(2)` 经由 `nix::libc` 调用，`EINTR` 自动重试；
- 建连阶段保持阻塞，完成后切换为非阻塞；监听套接字保持阻塞，仅在就绪后调用 `accept`。

## 风险与考量（Trade-offs）
- 仅支持类 Unix 平台（依赖文件描述符与 `poll(2)`）；
- `poll(2)` 每周期重建登记集合，对上千连接的场景成本线性增长，但换来了与水平触发语义的一一对应。
"#]

mod error;
mod select;
mod transport;
mod util;

pub use select::{PollSelector, wait_fd};
pub use transport::TcpTransport;
