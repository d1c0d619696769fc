//! Wire encoding for proxy destinations shared by SOCKS5, Shadowsocks and
//! Trojan: a 1-byte type tag followed by an IPv4 address, a length-prefixed
//! domain name, or an IPv6 address, followed by a 2-byte big-endian port.
//!
//! ```text
//! 0x01 | 4-byte IPv4           | 2-byte port   (7 bytes)
//! 0x03 | 1-byte len | hostname | 2-byte port   (4 + len bytes)
//! 0x04 | 16-byte IPv6          | 2-byte port   (19 bytes)
//! ```

use crate::common::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A proxy destination: either a literal IP or a domain name to be resolved
/// downstream, paired with a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ip(IpAddr, u16),
    Domain(String, u16),
}

impl Endpoint {
    pub fn port(&self) -> u16 {
        match self {
            Endpoint::Ip(_, p) | Endpoint::Domain(_, p) => *p,
        }
    }

    pub fn host_string(&self) -> String {
        match self {
            Endpoint::Ip(ip, _) => ip.to_string(),
            Endpoint::Domain(d, _) => d.clone(),
        }
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Endpoint::Domain(_, _))
    }

    /// Encode into the wire format described above.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if self.port() == 0 {
            return Err(Error::misc("endpoint port must be in [1, 65535]"));
        }
        match self {
            Endpoint::Ip(IpAddr::V4(v4), port) => {
                buf.put_u8(ATYP_IPV4);
                buf.put_slice(&v4.octets());
                buf.put_u16(*port);
            }
            Endpoint::Ip(IpAddr::V6(v6), port) => {
                buf.put_u8(ATYP_IPV6);
                buf.put_slice(&v6.octets());
                buf.put_u16(*port);
            }
            Endpoint::Domain(host, port) => {
                if host.is_empty() {
                    return Err(Error::misc("endpoint domain must not be empty"));
                }
                if host.len() > 255 {
                    return Err(Error::misc("endpoint domain exceeds 255 bytes"));
                }
                buf.put_u8(ATYP_DOMAIN);
                buf.put_u8(host.len() as u8);
                buf.put_slice(host.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    /// Decode from an in-memory buffer, advancing `buf` past the consumed
    /// bytes. Used when the whole endpoint is already available (e.g. after
    /// a Shadowsocks frame has been decrypted in full).
    pub fn decode(buf: &mut impl Buf) -> Result<Endpoint> {
        if !buf.has_remaining() {
            return Err(Error::misc("endpoint buffer is empty"));
        }
        let atyp = buf.get_u8();
        let ip = match atyp {
            ATYP_IPV4 => {
                if buf.remaining() < 4 {
                    return Err(Error::misc("endpoint buffer too small for IPv4"));
                }
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            ATYP_IPV6 => {
                if buf.remaining() < 16 {
                    return Err(Error::misc("endpoint buffer too small for IPv6"));
                }
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            ATYP_DOMAIN => {
                if !buf.has_remaining() {
                    return Err(Error::misc("endpoint buffer too small for domain length"));
                }
                let len = buf.get_u8() as usize;
                if len == 0 {
                    return Err(Error::bad_proto("zero-length domain"));
                }
                if buf.remaining() < len {
                    return Err(Error::misc("endpoint buffer too small for domain"));
                }
                let mut name = vec![0u8; len];
                buf.copy_to_slice(&mut name);
                let name = String::from_utf8(name)
                    .map_err(|_| Error::bad_proto("domain is not valid UTF-8"))?;
                if buf.remaining() < 2 {
                    return Err(Error::misc("endpoint buffer too small for port"));
                }
                let port = buf.get_u16();
                if port == 0 {
                    return Err(Error::misc("endpoint port must be in [1, 65535]"));
                }
                return Ok(Endpoint::Domain(name, port));
            }
            other => return Err(Error::bad_proto(format!("unknown endpoint tag 0x{:02x}", other))),
        };
        if buf.remaining() < 2 {
            return Err(Error::misc("endpoint buffer too small for port"));
        }
        let port = buf.get_u16();
        if port == 0 {
            return Err(Error::misc("endpoint port must be in [1, 65535]"));
        }
        Ok(Endpoint::Ip(ip.unwrap(), port))
    }

    /// Decode by reading directly from an async stream, one field at a
    /// time, so the caller never over-reads past the endpoint into
    /// following payload bytes.
    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> Result<Endpoint> {
        let atyp = r.read_u8().await?;
        match atyp {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                r.read_exact(&mut octets).await?;
                let port = r.read_u16().await?;
                if port == 0 {
                    return Err(Error::misc("endpoint port must be in [1, 65535]"));
                }
                Ok(Endpoint::Ip(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                r.read_exact(&mut octets).await?;
                let port = r.read_u16().await?;
                if port == 0 {
                    return Err(Error::misc("endpoint port must be in [1, 65535]"));
                }
                Ok(Endpoint::Ip(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            ATYP_DOMAIN => {
                let len = r.read_u8().await? as usize;
                if len == 0 {
                    return Err(Error::bad_proto("zero-length domain"));
                }
                let mut name = vec![0u8; len];
                r.read_exact(&mut name).await?;
                let name = String::from_utf8(name)
                    .map_err(|_| Error::bad_proto("domain is not valid UTF-8"))?;
                let port = r.read_u16().await?;
                if port == 0 {
                    return Err(Error::misc("endpoint port must be in [1, 65535]"));
                }
                Ok(Endpoint::Domain(name, port))
            }
            other => Err(Error::bad_proto(format!("unknown endpoint tag 0x{:02x}", other))),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Endpoint::Ip(IpAddr::V4(_), _) => 7,
            Endpoint::Ip(IpAddr::V6(_), _) => 19,
            Endpoint::Domain(host, _) => 4 + host.len(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ip(IpAddr::V6(v6), port) => write!(f, "[{}]:{}", v6, port),
            Endpoint::Ip(ip, port) => write!(f, "{}:{}", ip, port),
            Endpoint::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_ipv4() {
        let ep = Endpoint::Ip("1.2.3.4".parse().unwrap(), 443);
        let mut buf = BytesMut::new();
        ep.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 7);
        let mut slice = &buf[..];
        let decoded = Endpoint::decode(&mut slice).unwrap();
        assert_eq!(decoded, ep);
    }

    #[test]
    fn roundtrip_ipv6() {
        let ep = Endpoint::Ip("::1".parse().unwrap(), 80);
        let mut buf = BytesMut::new();
        ep.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 19);
        let mut slice = &buf[..];
        assert_eq!(Endpoint::decode(&mut slice).unwrap(), ep);
    }

    #[test]
    fn roundtrip_domain() {
        let ep = Endpoint::Domain("example.com".into(), 8080);
        let mut buf = BytesMut::new();
        ep.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 11);
        let mut slice = &buf[..];
        assert_eq!(Endpoint::decode(&mut slice).unwrap(), ep);
    }

    #[test]
    fn rejects_zero_length_domain() {
        let mut buf = BytesMut::new();
        buf.put_u8(ATYP_DOMAIN);
        buf.put_u8(0);
        let mut slice = &buf[..];
        let err = Endpoint::decode(&mut slice).unwrap_err();
        assert!(matches!(err, Error::BadProto(_)));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x7f);
        let mut slice = &buf[..];
        let err = Endpoint::decode(&mut slice).unwrap_err();
        assert!(matches!(err, Error::BadProto(_)));
    }

    #[test]
    fn rejects_oversized_domain_on_encode() {
        let ep = Endpoint::Domain("a".repeat(256), 80);
        let mut buf = BytesMut::new();
        let err = ep.encode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Misc(_)));
    }

    #[test]
    fn rejects_zero_port_on_encode() {
        let ep = Endpoint::Domain("example.com".into(), 0);
        let mut buf = BytesMut::new();
        let err = ep.encode(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Misc(_)));
    }

    #[tokio::test]
    async fn read_from_stream() {
        let ep = Endpoint::Domain("foo.test".into(), 53);
        let mut buf = BytesMut::new();
        ep.encode(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf.to_vec());
        let decoded = Endpoint::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded, ep);
    }
}
