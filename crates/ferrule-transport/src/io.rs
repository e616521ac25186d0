/// 一次非阻塞读取的结果。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“暂时无数据”“对端结束”与“读到数据”区分成三种互斥的值，而不是混在错误通道里；
///   调用方因此不会把 would-block 当作故障，也不会把零长度读取误当作成功。
///
/// ## 契约（What）
/// - `Data(n)`：`n > 0` 字节已写入调用方缓冲区（仅当缓冲区为空时才可能为 0）；
/// - `Retry`：当前无数据，调用方需在就绪通知后重新调用；
/// - `EndOfStream`：连接已结束，附带结束方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Retry,
    EndOfStream(StreamEnd),
}

impl ReadOutcome {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream(_))
    }

    /// 读到的字节数；非 `Data` 结果一律视为 0，避免调用方误读旧缓冲区内容。
    pub fn transferred(&self) -> usize {
        match self {
            ReadOutcome::Data(len) => *len,
            _ => 0,
        }
    }
}

/// 连接结束的方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// 对端发送了 TLS `close_notify`。
    CloseNotify,
    /// 底层套接字读到 0 字节，且没有收到关闭通知。
    Eof,
}

/// 就绪等待的操作方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WaitOp {
    Read,
    Write,
}
