use std::{
    io::{self, Read},
    mem::MaybeUninit,
    net::SocketAddr,
    os::fd::{AsFd, BorrowedFd},
    time::Duration,
};

use ferrule_transport::{
    ConnectTarget, KeepAlive, ListenTarget, RawTransport, ReadOutcome, Result, StreamEnd,
};
use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};
use tracing::debug;

use crate::{
    error::{self, is_transient, map_io_error, operation_error},
    util::{resolve, wildcard},
};

/// 基于 `socket2::Socket` 的原始 TCP 传输。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为 TLS 驱动提供唯一的字节管道，同时在明文模式下直接作为连接实现；
/// - 所有套接字选项（保活、`SO_LINGER`、设备绑定）集中在此处设置，TLS 层无需了解细节。
///
/// ## 逻辑 (How)
/// - 建连：解析并按地址族过滤候选地址，逐个阻塞式 `connect`，成功后切换为非阻塞；
/// - 监听：`SO_REUSEADDR` + `bind` + `listen`，监听套接字保持阻塞；
/// - 收发：单次 `recv`/`send`，`WouldBlock`/`Interrupted` 分别映射为 `Retry` 与 `Ok(0)`；
/// - 中止：设置 `SO_LINGER {on, 0}`，关闭时内核发送 RST 而非 FIN。
///
/// ## 契约 (What)
/// - 接受得到的连接继承监听实例保存的保活参数（需再次调用 `enable_keep_alive` 生效）；
/// - `peer_addr`/`local_addr` 在构造时缓存，不随后续状态变化。
///
/// ## 注意事项 (Trade-offs)
/// - 建连阶段阻塞，换来的是无需在调用方处理 `EINPROGRESS`；
/// - `abort` 的复位在实例被丢弃（关闭描述符）时才真正发出。
#[derive(Debug)]
pub struct TcpTransport {
    socket: Socket,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    keep_alive: KeepAlive,
}

impl TcpTransport {
    fn from_socket(socket: Socket, peer_addr: Option<SocketAddr>) -> Self {
        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket());
        Self {
            socket,
            peer_addr,
            local_addr,
            keep_alive: KeepAlive::default(),
        }
    }

    /// 当前保存的保活参数。
    pub fn keep_alive(&self) -> KeepAlive {
        self.keep_alive
    }
}

impl AsFd for TcpTransport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl RawTransport for TcpTransport {
    fn connect(target: &ConnectTarget) -> Result<Self> {
        let candidates = resolve(&target.host, target.port, target.family)?;
        let mut last_error = None;
        for addr in candidates {
            match connect_one(addr, target.device.as_deref()) {
                Ok(socket) => {
                    socket
                        .set_nonblocking(true)
                        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
                    debug!(peer = %addr, "tcp connection established");
                    return Ok(Self::from_socket(socket, Some(addr)));
                }
                Err(err) => {
                    debug!(peer = %addr, error = %err, "tcp connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => map_io_error(error::CONNECT, err),
            None => operation_error(error::CONNECT, "no candidate address"),
        })
    }

    fn listen(target: &ListenTarget) -> Result<Self> {
        let addr = match target.address.as_deref() {
            Some(address) => resolve(address, target.port, target.family)?
                .into_iter()
                .next()
                .ok_or_else(|| operation_error(error::BIND, "no listen address"))?,
            None => wildcard(target.family, target.port),
        };
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .set_reuse_address(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        socket
            .bind(&SockAddr::from(addr))
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .listen(target.backlog)
            .map_err(|err| map_io_error(error::BIND, err))?;
        let listener = Self::from_socket(socket, None);
        debug!(local = ?listener.local_addr, backlog = target.backlog, "tcp listener ready");
        Ok(listener)
    }

    fn accept_conn_req(&self) -> Result<Self> {
        let (socket, peer) = loop {
            match self.socket.accept() {
                Ok(accepted) => break accepted,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io_error(error::ACCEPT, err)),
            }
        };
        socket
            .set_nonblocking(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let mut accepted = Self::from_socket(socket, peer.as_socket());
        accepted.keep_alive = self.keep_alive;
        debug!(peer = ?accepted.peer_addr, "tcp connection accepted");
        Ok(accepted)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        match self.socket.send(buf) {
            Ok(written) => Ok(written),
            Err(err) if is_transient(&err) => Ok(0),
            Err(err) => Err(map_io_error(error::WRITE, err)),
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }
        match (&self.socket).read(buf) {
            Ok(0) => Ok(ReadOutcome::EndOfStream(StreamEnd::Eof)),
            Ok(read) => Ok(ReadOutcome::Data(read)),
            Err(err) if is_transient(&err) => Ok(ReadOutcome::Retry),
            Err(err) => Err(map_io_error(error::READ, err)),
        }
    }

    fn abort(&mut self) -> Result<()> {
        self.socket
            .set_linger(Some(Duration::ZERO))
            .map_err(|err| map_io_error(error::ABORT, err))
    }

    fn set_keep_alive(&mut self, keep_alive: KeepAlive) {
        self.keep_alive = keep_alive;
    }

    fn enable_keep_alive(&mut self) -> Result<()> {
        let params = keep_alive_params(self.keep_alive);
        self.socket
            .set_tcp_keepalive(&params)
            .map_err(|err| map_io_error(error::CONFIGURE, err))
    }

    fn check_connection(&self) -> bool {
        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        match self.socket.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) => is_transient(&err),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

fn connect_one(addr: SocketAddr, device: Option<&str>) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if let Some(device) = device {
        bind_device(&socket, device)?;
    }
    socket.connect(&SockAddr::from(addr))?;
    Ok(socket)
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_device(socket: &Socket, device: &str) -> io::Result<()> {
    socket.bind_device(Some(device.as_bytes()))
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_device(_socket: &Socket, device: &str) -> io::Result<()> {
    tracing::warn!(device, "device binding is not supported on this platform, ignored");
    Ok(())
}

fn keep_alive_params(keep_alive: KeepAlive) -> TcpKeepalive {
    let mut params = TcpKeepalive::new();
    if let Some(time) = keep_alive.time {
        params = params.with_time(time);
    }
    #[cfg(any(
        target_os = "android",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "macos"
    ))]
    {
        if let Some(interval) = keep_alive.interval {
            params = params.with_interval(interval);
        }
        if let Some(probes) = keep_alive.probes {
            params = params.with_retries(probes);
        }
    }
    #[cfg(not(any(
        target_os = "android",
        target_os = "freebsd",
        target_os = "linux",
        target_os = "macos"
    )))]
    if keep_alive.interval.is_some() || keep_alive.probes.is_some() {
        tracing::warn!("keep-alive interval/probes are not supported on this platform, ignored");
    }
    params
}
