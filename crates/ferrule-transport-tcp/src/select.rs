use std::{
    os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd},
    time::{Duration, Instant},
};

use ferrule_transport::{Result, WaitOp};
use nix::{errno::Errno, libc};
use tracing::trace;

use crate::error::{self, map_io_error};

const READ_READY: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
const WRITE_READY: libc::c_short = libc::POLLOUT | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

#[derive(Clone, Copy, Debug)]
struct Registration {
    fd: RawFd,
    events: libc::c_short,
    revents: libc::c_short,
}

/// 水平触发的原始套接字就绪多路复用器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 作为 TLS 层多路复用器的下层原语，只观察内核可见的套接字状态；
/// - 每个等待周期由调用方重建登记集合，语义与 `poll(2)` 一一对应。
///
/// ## 契约（What）
/// - `add`：同一描述符重复登记时合并事件；
/// - `select`：`None` 表示无限等待，返回就绪描述符数量；空集合且无限等待时立即返回 0；
/// - `is_ready`：只对已登记的描述符给出结果，挂断与错误同时视为读写就绪，
///   让调用方在随后的收发中观察到真正的失败；
/// - `clear`：清空登记，开始下一个周期。
///
/// ## 风险提示（Trade-offs）
/// - 被 `EINTR` 打断时按剩余超时重试，调用方不会看到中断。
#[derive(Debug, Default)]
pub struct PollSelector {
    entries: Vec<Registration>,
}

impl PollSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个描述符的读或写兴趣。
    pub fn add(&mut self, fd: BorrowedFd<'_>, op: WaitOp) {
        let raw = fd.as_raw_fd();
        let events = interest(op);
        match self.entries.iter_mut().find(|entry| entry.fd == raw) {
            Some(entry) => entry.events |= events,
            None => self.entries.push(Registration {
                fd: raw,
                events,
                revents: 0,
            }),
        }
    }

    /// 阻塞等待任一登记描述符就绪。
    pub fn select(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if self.entries.is_empty() && timeout.is_none() {
            return Ok(0);
        }
        let mut fds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|entry| libc::pollfd {
                fd: entry.fd,
                events: entry.events,
                revents: 0,
            })
            .collect();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let ready = loop {
            let budget = poll_timeout(deadline);
            // SAFETY: `fds` 在调用期间保持存活，长度与传入的 nfds 一致。
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, budget) };
            match Errno::result(ret) {
                Ok(ready) => break ready as usize,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(map_io_error(error::POLL, errno.into())),
            }
        };
        for (entry, polled) in self.entries.iter_mut().zip(&fds) {
            entry.revents = polled.revents;
        }
        trace!(registered = self.entries.len(), ready, "poll cycle finished");
        Ok(ready)
    }

    /// 查询上一次 `select` 后描述符是否就绪。
    pub fn is_ready(&self, fd: BorrowedFd<'_>, op: WaitOp) -> bool {
        let raw = fd.as_raw_fd();
        let mask = match op {
            WaitOp::Read => READ_READY,
            WaitOp::Write => WRITE_READY,
        };
        self.entries
            .iter()
            .find(|entry| entry.fd == raw)
            .is_some_and(|entry| entry.revents & mask != 0)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 等待单个描述符在给定方向上就绪，超时返回 `false`。
pub fn wait_fd(fd: impl AsFd, op: WaitOp, timeout: Option<Duration>) -> Result<bool> {
    let fd = fd.as_fd();
    let mut selector = PollSelector::new();
    selector.add(fd, op);
    selector.select(timeout)?;
    Ok(selector.is_ready(fd, op))
}

fn interest(op: WaitOp) -> libc::c_short {
    match op {
        WaitOp::Read => libc::POLLIN,
        WaitOp::Write => libc::POLLOUT,
    }
}

fn poll_timeout(deadline: Option<Instant>) -> libc::c_int {
    let Some(deadline) = deadline else {
        return -1;
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut millis = remaining.as_millis();
    if remaining.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, os::unix::net::UnixStream};

    #[test]
    fn reports_readable_after_peer_writes() {
        let (mut left, right) = UnixStream::pair().expect("socket pair");
        let mut selector = PollSelector::new();
        selector.add(right.as_fd(), WaitOp::Read);
        assert_eq!(
            selector
                .select(Some(Duration::from_millis(10)))
                .expect("poll"),
            0
        );
        assert!(!selector.is_ready(right.as_fd(), WaitOp::Read));

        left.write_all(b"x").expect("write");
        assert_eq!(selector.select(None).expect("poll"), 1);
        assert!(selector.is_ready(right.as_fd(), WaitOp::Read));
        assert!(!selector.is_ready(left.as_fd(), WaitOp::Read));
    }

    #[test]
    fn merges_duplicate_registrations() {
        let (left, _right) = UnixStream::pair().expect("socket pair");
        let mut selector = PollSelector::new();
        selector.add(left.as_fd(), WaitOp::Read);
        selector.add(left.as_fd(), WaitOp::Write);
        assert_eq!(selector.len(), 1);

        selector.select(Some(Duration::ZERO)).expect("poll");
        assert!(selector.is_ready(left.as_fd(), WaitOp::Write));
        assert!(!selector.is_ready(left.as_fd(), WaitOp::Read));

        selector.clear();
        assert!(selector.is_empty());
        assert!(!selector.is_ready(left.as_fd(), WaitOp::Write));
    }

    #[test]
    fn empty_infinite_wait_returns_immediately() {
        let mut selector = PollSelector::new();
        assert_eq!(selector.select(None).expect("poll"), 0);
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (left, right) = UnixStream::pair().expect("socket pair");
        drop(left);
        assert!(wait_fd(&right, WaitOp::Read, Some(Duration::from_secs(1))).expect("poll"));
    }

    #[test]
    fn timeout_rounds_up_sub_millisecond_budgets() {
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(poll_timeout(Some(deadline)) > 4_000);
        assert_eq!(poll_timeout(None), -1);
    }
}
