use std::{os::fd::AsFd, time::Duration};

use ferrule_transport::{RawTransport, Result, WaitOp};
use ferrule_transport_tcp::PollSelector;
use tracing::debug;

use crate::{config::Mode, stream::TlsStream};

/// 聚合多个 [`TlsStream`] 的就绪多路复用器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 已从套接字读出并解密、但尚未交付的明文不会让套接字再次变为可读；
///   若仍对这类连接做原始轮询，调用方会永远等不到这次读就绪。
///
/// ## 逻辑（How）
/// - `add`：TLS 连接等待读且引擎内已有明文时，只递增 `pending_buffered`，不登记原始描述符；
///   其余情况原样交给 [`PollSelector`]；
/// - `select`：`pending_buffered > 0` 时直接返回该计数，不调用 `poll(2)`；
/// - `is_ready`：命中缓冲明文的连接报告就绪并消费一次计数；计数仍非零时，
///   其余连接一律报告未就绪，不回落到原始检查。
///
/// ## 契约（What）
/// - 每个周期（`add`* → `select` → 每个登记连接一次 `is_ready`）结束后计数回到 0；
/// - 计数递减在 0 处饱和；
/// - 周期之间需调用 [`reset`](Self::reset) 或新建实例，未消费的计数会留到下一周期。
#[derive(Debug, Default)]
pub struct TlsSelector {
    raw: PollSelector,
    pending_buffered: usize,
}

impl TlsSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个连接的读或写兴趣。
    pub fn add<T: RawTransport>(&mut self, stream: &TlsStream<T>, op: WaitOp) {
        if has_buffered_read(stream, op) {
            self.pending_buffered += 1;
            debug!(
                fd = stream.socket_descriptor(),
                pending = self.pending_buffered,
                "data already buffered, dummy select armed"
            );
            return;
        }
        self.raw.add(stream.as_fd(), op);
    }

    /// 等待就绪；存在缓冲明文时不进入真正的等待。
    pub fn select(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if self.pending_buffered > 0 {
            debug!(pending = self.pending_buffered, "dummy select, buffered data present");
            return Ok(self.pending_buffered);
        }
        self.raw.select(timeout)
    }

    /// 查询连接是否就绪；每个登记连接每周期只应查询一次。
    pub fn is_ready<T: RawTransport>(&mut self, stream: &TlsStream<T>, op: WaitOp) -> bool {
        if has_buffered_read(stream, op) {
            self.pending_buffered = self.pending_buffered.saturating_sub(1);
            return true;
        }
        if self.pending_buffered > 0 {
            return false;
        }
        self.raw.is_ready(stream.as_fd(), op)
    }

    pub fn pending_buffered(&self) -> usize {
        self.pending_buffered
    }

    /// 清空原始登记与缓冲计数，开始新的周期。
    pub fn reset(&mut self) {
        self.raw.clear();
        self.pending_buffered = 0;
    }
}

fn has_buffered_read<T: RawTransport>(stream: &TlsStream<T>, op: WaitOp) -> bool {
    stream.mode() == Mode::Secure && op == WaitOp::Read && stream.buffered_plaintext() > 0
}
