//! Raw-socket ICMP echo, shared process-wide — there is no per-thread kernel
//! state to isolate, so one [`Socket2IcmpDriver`] instance backs every
//! worker's `IcmpBatch` task.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use discoverer_core::error::CheckError;

use crate::drivers::IcmpDriver;

const ECHO_REQUEST_TYPE_V4: u8 = 8;
const ECHO_REQUEST_TYPE_V6: u8 = 128;
const ECHO_REPLY_TYPE_V4: u8 = 0;
const ECHO_REPLY_TYPE_V6: u8 = 129;

fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn build_echo_request(echo_type: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 8];
    packet[0] = echo_type;
    packet[1] = 0; // code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// One shared raw-socket pair (v4 + v6), built once at process start.
pub struct Socket2IcmpDriver {
    v4: Socket,
    v6: Socket,
    identifier: u16,
}

impl Socket2IcmpDriver {
    pub fn new(identifier: u16) -> io::Result<Self> {
        let v4 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
        v4.set_read_timeout(Some(Duration::from_millis(50)))?;
        let v6 = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::ICMPV6))?;
        v6.set_read_timeout(Some(Duration::from_millis(50)))?;
        Ok(Self { v4, v6, identifier })
    }

    fn socket_for(&self, addr: IpAddr) -> &Socket {
        match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }
}

impl IcmpDriver for Socket2IcmpDriver {
    /// Sends one echo request per address, then drains replies until
    /// `timeout` elapses or every address has answered. Addresses that
    /// never reply are simply absent from the returned set — `IcmpBatch`
    /// treats that as "not materialised as down", per the non-responder
    /// rule.
    fn ping_batch(&self, addrs: &[IpAddr], timeout: Duration) -> Result<Vec<IpAddr>, CheckError> {
        let mut pending: std::collections::HashSet<IpAddr> = addrs.iter().copied().collect();
        for (seq, addr) in addrs.iter().enumerate() {
            let echo_type = if addr.is_ipv4() { ECHO_REQUEST_TYPE_V4 } else { ECHO_REQUEST_TYPE_V6 };
            let packet = build_echo_request(echo_type, self.identifier, seq as u16);
            let dest = SockAddr::from(SocketAddr::new(*addr, 0));
            let socket = self.socket_for(*addr);
            let _ = socket.send_to(&packet, &dest);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [std::mem::MaybeUninit::uninit(); 128];
        let mut replied = Vec::new();
        while Instant::now() < deadline && !pending.is_empty() {
            for socket in [&self.v4, &self.v6] {
                match socket.recv_from(&mut buf) {
                    Ok((len, from)) => {
                        if let Some(from_addr) = from.as_socket() {
                            let ip = from_addr.ip();
                            if pending.remove(&ip) && is_echo_reply(&buf, len) {
                                replied.push(ip);
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
                    Err(_) => {}
                }
            }
        }
        Ok(replied)
    }
}

fn is_echo_reply(buf: &[std::mem::MaybeUninit<u8>], len: usize) -> bool {
    if len == 0 {
        return false;
    }
    // SAFETY: `recv_from` guarantees the first `len` bytes are initialised.
    let bytes: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
    matches!(bytes.first(), Some(&ECHO_REPLY_TYPE_V4) | Some(&ECHO_REPLY_TYPE_V6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_all_zero_header_is_all_ones() {
        let packet = build_echo_request(ECHO_REQUEST_TYPE_V4, 1, 1);
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn echo_request_carries_identifier_and_sequence() {
        let packet = build_echo_request(ECHO_REQUEST_TYPE_V4, 0xabcd, 7);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 0xabcd);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
    }
}
