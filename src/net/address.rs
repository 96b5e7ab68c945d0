//! Module with [`IpSocketAddress`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use socket2::SockAddr;

use crate::error::{Domain, Error, ErrorOr, Kind};

/// Version of the Internet Protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    ///
    /// Addresses with this version can be created and displayed, but not used
    /// to create sockets.
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "IPv4",
            IpVersion::V6 => "IPv6",
        })
    }
}

/// An IP address in presentation form, e.g. `127.0.0.1`, and a port.
///
/// # Examples
///
/// ```
/// use anvil::net::{IpSocketAddress, IpVersion};
///
/// let address: IpSocketAddress = "127.0.0.1:8080".parse()?;
/// assert_eq!(address.version(), IpVersion::V4);
/// assert_eq!(address.address(), "127.0.0.1");
/// assert_eq!(address.port(), 8080);
/// assert_eq!(address.to_string(), "127.0.0.1:8080");
/// # Ok::<(), anvil::Error>(())
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct IpSocketAddress {
    version: IpVersion,
    address: String,
    port: u16,
}

impl IpSocketAddress {
    /// Create a new IPv4 address.
    ///
    /// `address` isn't validated until the address is used, see
    /// [`IpSocketAddress::to_socket_addr`].
    pub fn from_ipv4_address<A>(address: A, port: u16) -> IpSocketAddress
    where
        A: Into<String>,
    {
        IpSocketAddress {
            version: IpVersion::V4,
            address: address.into(),
            port,
        }
    }

    /// Create a new IPv6 address.
    pub fn from_ipv6_address<A>(address: A, port: u16) -> IpSocketAddress
    where
        A: Into<String>,
    {
        IpSocketAddress {
            version: IpVersion::V6,
            address: address.into(),
            port,
        }
    }

    /// Create an address from a standard library [`SocketAddr`].
    pub fn from_socket_addr(address: SocketAddr) -> IpSocketAddress {
        match address.ip() {
            IpAddr::V4(ip) => IpSocketAddress::from_ipv4_address(ip.to_string(), address.port()),
            IpAddr::V6(ip) => IpSocketAddress::from_ipv6_address(ip.to_string(), address.port()),
        }
    }

    /// Create an address from the result of a system call named `call`, e.g.
    /// `getsockname()`.
    pub(crate) fn from_sock_addr(address: &SockAddr, call: &str) -> ErrorOr<IpSocketAddress> {
        match address.as_socket() {
            Some(address) => Ok(IpSocketAddress::from_socket_addr(address)),
            None => Err(Error::from_errno(libc::EAFNOSUPPORT, call, Domain::Network)),
        }
    }

    /// Returns the IP version of the address.
    pub const fn version(&self) -> IpVersion {
        self.version
    }

    /// Returns the address in presentation form.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the port.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Convert the address into a form that can be used in system calls.
    ///
    /// Fails if the address isn't a valid IPv4 address in presentation form,
    /// or if the address is an IPv6 address.
    pub fn to_socket_addr(&self) -> ErrorOr<SocketAddr> {
        match self.version {
            IpVersion::V4 => match self.address.parse::<Ipv4Addr>() {
                Ok(ip) => Ok(SocketAddr::V4(SocketAddrV4::new(ip, self.port))),
                Err(_) => Err(Error::from_string(
                    format!("invalid IPv4 address: '{}'", self.address),
                    Domain::Network,
                    Kind::Generic,
                )),
            },
            IpVersion::V6 => Err(Error::from_string(
                format!("IPv6 addresses are not supported: '{}'", self.address),
                Domain::Network,
                Kind::Generic,
            )),
        }
    }
}

impl fmt::Display for IpSocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            IpVersion::V4 => write!(f, "{}:{}", self.address, self.port),
            IpVersion::V6 => write!(f, "[{}]:{}", self.address, self.port),
        }
    }
}

/// Parses `host:port`, or `[host]:port` for IPv6 addresses.
impl FromStr for IpSocketAddress {
    type Err = Error;

    fn from_str(input: &str) -> Result<IpSocketAddress, Error> {
        let invalid = || {
            Error::from_string(
                format!("invalid socket address: '{}'", input),
                Domain::Network,
                Kind::Generic,
            )
        };

        let split = input.rfind(':').ok_or_else(invalid)?;
        let (host, port) = (&input[..split], &input[split + 1..]);
        let port = port.parse().map_err(|_| invalid())?;
        if host.starts_with('[') && host.ends_with(']') && host.len() > 2 {
            Ok(IpSocketAddress::from_ipv6_address(&host[1..host.len() - 1], port))
        } else if !host.is_empty() && !host.contains(':') {
            Ok(IpSocketAddress::from_ipv4_address(host, port))
        } else {
            Err(invalid())
        }
    }
}
