use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use ferrule_transport::{AddressFamily, Result};

use crate::error::{self, map_io_error, operation_error};

/// 解析主机与端口，并按地址族过滤。
///
/// 保留解析器给出的顺序，调用方按序逐个尝试。
pub(crate) fn resolve(host: &str, port: u16, family: AddressFamily) -> Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| map_io_error(error::RESOLVE, err))?
        .filter(|addr| family.admits(addr))
        .collect();
    if candidates.is_empty() {
        return Err(operation_error(
            error::RESOLVE,
            &format!("no {family:?} address for {host}:{port}"),
        ));
    }
    Ok(candidates)
}

/// 监听地址为空时按地址族选择通配地址。
pub(crate) fn wildcard(family: AddressFamily, port: u16) -> SocketAddr {
    match family {
        AddressFamily::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        AddressFamily::V4 | AddressFamily::Unspecified => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
        }
    }
}
