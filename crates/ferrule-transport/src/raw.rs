use std::{fmt::Debug, net::SocketAddr, os::fd::AsFd, time::Duration};

use crate::{ConnectTarget, ListenTarget, ReadOutcome, Result};

/// 原始（未加密）字节流传输的统一接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TLS 驱动只把它当作“字节管道”：握手与记录层的每个字节最终都经由这里上/下线；
/// - 明文模式下 TLS 驱动对其是纯透传，因此该接口本身就定义了明文模式的全部可观测行为。
///
/// ## 架构定位（Architecture）
/// - `ferrule-transport-tcp::TcpTransport` 是默认实现；
/// - 以 `AsFd` 作为超 trait，使就绪多路复用器能直接对描述符做 `poll(2)`。
///
/// ## 契约（What）
/// - `send`：单次非阻塞发送，返回实际写出的字节数；would-block/中断返回 `Ok(0)`，
///   调用方据此继续补发剩余部分；
/// - `receive`：单次非阻塞接收，would-block 返回 [`ReadOutcome::Retry`]，
///   读到 0 字节返回 [`ReadOutcome::EndOfStream`]；
/// - `accept_conn_req`：在监听实例上接受一个对端，新实例处于非阻塞模式；
/// - `abort`：安排一次非优雅的复位，使阻塞在对端的读者立即失败；
/// - 保活参数先通过 `set_keep_alive` 保存，`enable_keep_alive` 时才写入套接字。
///
/// ## 风险提示（Trade-offs）
/// - 实现必须保持 `send`/`receive` 非阻塞，否则 TLS 驱动基于就绪等待的发送与握手推进会退化为阻塞调用；
/// - `check_connection` 只是尽力探测，无法发现尚未被内核察觉的断链。
pub trait RawTransport: AsFd + Debug + Send + Sized {
    /// 建立到目标的连接。
    fn connect(target: &ConnectTarget) -> Result<Self>;

    /// 绑定并监听。
    fn listen(target: &ListenTarget) -> Result<Self>;

    /// 在监听实例上接受一个新连接。
    fn accept_conn_req(&self) -> Result<Self>;

    /// 单次非阻塞发送。
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// 单次非阻塞接收。
    fn receive(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// 强制复位连接。
    fn abort(&mut self) -> Result<()>;

    /// 保存保活参数，待 `enable_keep_alive` 时生效。
    fn set_keep_alive(&mut self, keep_alive: KeepAlive);

    /// 在套接字上开启保活。
    fn enable_keep_alive(&mut self) -> Result<()>;

    /// 探测连接是否仍然存活。
    fn check_connection(&self) -> bool;

    fn peer_addr(&self) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// TCP 保活参数；`None` 表示沿用系统默认值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAlive {
    /// 连接空闲多久后开始探测。
    pub time: Option<Duration>,
    /// 两次探测之间的间隔。
    pub interval: Option<Duration>,
    /// 判定断链前的探测次数。
    pub probes: Option<u32>,
}
