use std::net::SocketAddr;

/// 解析目标主机时允许的地址族。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressFamily {
    /// IPv4 与 IPv6 均可。
    #[default]
    Unspecified,
    V4,
    V6,
}

impl AddressFamily {
    /// 判断解析得到的地址是否属于该地址族。
    pub fn admits(&self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Unspecified => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }
}

/// 客户端建连目标。
///
/// `device` 仅在 Linux 上生效（`SO_BINDTODEVICE`），其他平台忽略。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub family: AddressFamily,
    pub host: String,
    pub port: u16,
    pub device: Option<String>,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            family: AddressFamily::Unspecified,
            host: host.into(),
            port,
            device: None,
        }
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// 服务端监听目标；`address` 为空时绑定到通配地址。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenTarget {
    pub family: AddressFamily,
    pub address: Option<String>,
    pub port: u16,
    pub backlog: i32,
}

impl ListenTarget {
    /// 默认 backlog，与常见 `SOMAXCONN` 取值保持同一量级。
    pub const DEFAULT_BACKLOG: i32 = 128;

    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            family: AddressFamily::Unspecified,
            address: Some(address.into()),
            port,
            backlog: Self::DEFAULT_BACKLOG,
        }
    }

    /// 绑定 `127.0.0.1` 的临时端口，测试与本地工具常用。
    pub fn loopback() -> Self {
        Self::new("127.0.0.1", 0).with_family(AddressFamily::V4)
    }

    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }
}
