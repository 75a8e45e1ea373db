//! Local host identity: the address stamped on events as `serverIp` and the
//! hardware address that seeds the id generator's worker id.


use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, ToSocketAddrs};
use std::sync::OnceLock;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use regex::RegexSet;

/// Virtual interfaces that never identify the host.
const IGNORED_INTERFACES: &[&str] = &[
  r"^docker.*",
  r"^veth.*",
  r"^br-.*",
  r"^virbr.*",
  r"^vmnet.*",
  r"^vboxnet.*",
];

static LOCAL_IP: OnceLock<String> = OnceLock::new();
static IGNORED: OnceLock<RegexSet> = OnceLock::new();

/// A network interface with every address `getifaddrs` reported for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
  pub name: String,
  pub index: u32,
  pub up: bool,
  pub loopback: bool,
  pub hardware_address: Option<Vec<u8>>,
  pub ipv4: Vec<Ipv4Addr>,
}

pub fn is_ignored_interface(name: &str) -> bool {
  IGNORED
    .get_or_init(|| RegexSet::new(IGNORED_INTERFACES).unwrap_or_else(|_| RegexSet::empty()))
    .is_match(name)
}

/// All-zero addresses (loopback) count as absent.
fn usable_hardware_address(bytes: &[u8]) -> Option<Vec<u8>> {
  if bytes.is_empty() || bytes.iter().all(|b| *b == 0) {
    return None;
  }
  Some(bytes.to_vec())
}

/// Interfaces that may identify the host: up, not loopback, not virtual.
/// Ordered by interface index.
fn candidates(interfaces: &[InterfaceInfo]) -> Vec<&InterfaceInfo> {
  let mut candidates: Vec<&InterfaceInfo> = interfaces
    .iter()
    .filter(|ifc| ifc.up && !ifc.loopback && !is_ignored_interface(&ifc.name))
    .collect();
  candidates.sort_by_key(|ifc| ifc.index);
  candidates
}

/// First usable hardware address, in interface index order.
pub fn select_hardware_address(interfaces: &[InterfaceInfo]) -> Option<Vec<u8>> {
  candidates(interfaces)
    .into_iter()
    .find_map(|ifc| ifc.hardware_address.clone())
}

/// First non-loopback, non-link-local IPv4 address, in interface index order.
pub fn select_local_ipv4(interfaces: &[InterfaceInfo]) -> Option<Ipv4Addr> {
  candidates(interfaces).into_iter().find_map(|ifc| {
    tracing::trace!(interface = %ifc.name, index = ifc.index, "checking interface");
    ifc
      .ipv4
      .iter()
      .find_map(|ip| usable_v4(IpAddr::V4(*ip)))
  })
}

/// Enumerate interfaces. Empty when the system refuses to list them.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
  let addrs = match getifaddrs() {
    Ok(addrs) => addrs,
    Err(e) => {
      tracing::debug!(error = %e, "cannot list network interfaces");
      return Vec::new();
    },
  };

  let mut by_name: BTreeMap<String, InterfaceInfo> = BTreeMap::new();
  for addr in addrs {
    let ifc = by_name
      .entry(addr.interface_name.clone())
      .or_insert_with(|| InterfaceInfo {
        index: if_nametoindex(addr.interface_name.as_str()).unwrap_or(0),
        name: addr.interface_name.clone(),
        ..InterfaceInfo::default()
      });
    ifc.up |= addr.flags.contains(InterfaceFlags::IFF_UP);
    ifc.loopback |= addr.flags.contains(InterfaceFlags::IFF_LOOPBACK);

    let Some(storage) = addr.address else {
      continue;
    };
    if let Some(sin) = storage.as_sockaddr_in() {
      ifc.ipv4.push(*SocketAddrV4::from(*sin).ip());
    } else if let Some(mac) = storage.as_link_addr().and_then(|link| link.addr()) {
      ifc.hardware_address = ifc.hardware_address.take().or_else(|| usable_hardware_address(&mac));
    }
  }
  by_name.into_values().collect()
}

/// Hardware address of this host, if one can be found.
pub fn hardware_address() -> Option<Vec<u8>> {
  select_hardware_address(&list_interfaces())
}

fn usable_v4(ip: IpAddr) -> Option<Ipv4Addr> {
  match ip {
    IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified() => Some(v4),
    _ => None,
  }
}

fn hostname_address() -> Option<Ipv4Addr> {
  let hostname = gethostname::gethostname().to_string_lossy().into_owned();
  (hostname.as_str(), 0)
    .to_socket_addrs()
    .ok()?
    .find_map(|addr| usable_v4(addr.ip()))
}

fn find_local_ip() -> String {
  if let Some(ip) = select_local_ipv4(&list_interfaces()) {
    return ip.to_string();
  }
  if let Some(ip) = hostname_address() {
    return ip.to_string();
  }
  tracing::warn!("cannot determine a non-loopback address, using 127.0.0.1");
  Ipv4Addr::LOCALHOST.to_string()
}

/// This host's IPv4 address, resolved once per process.
pub fn local_ip() -> &'static str {
  LOCAL_IP.get_or_init(find_local_ip)
}
