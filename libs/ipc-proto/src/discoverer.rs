//! Wire messages for the Discoverer IPC endpoint: queue depth, per-worker
//! usage stats, and two notifications.

use crate::codec::{CodecError, Reader, Result, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscovererOp {
    Queue = 1,
    UsageStats = 2,
    SnmpCacheReload = 3,
    Shutdown = 4,
}

impl DiscovererOp {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Self::Queue,
            2 => Self::UsageStats,
            3 => Self::SnmpCacheReload,
            4 => Self::Shutdown,
            other => return Err(CodecError::UnknownCode(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscovererRequest {
    Queue,
    UsageStats,
    SnmpCacheReload,
    Shutdown,
}

impl DiscovererRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        let op = match self {
            Self::Queue => DiscovererOp::Queue,
            Self::UsageStats => DiscovererOp::UsageStats,
            Self::SnmpCacheReload => DiscovererOp::SnmpCacheReload,
            Self::Shutdown => DiscovererOp::Shutdown,
        };
        w.u8(op as u8);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        Ok(match DiscovererOp::from_u8(r.u8("op")?)? {
            DiscovererOp::Queue => Self::Queue,
            DiscovererOp::UsageStats => Self::UsageStats,
            DiscovererOp::SnmpCacheReload => Self::SnmpCacheReload,
            DiscovererOp::Shutdown => Self::Shutdown,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscovererReply {
    QueueDepth(u64),
    UsageStats(Vec<f64>),
    /// Sent back for notifications that don't otherwise carry a reply
    /// (`SNMP_CACHE_RELOAD`), so the client's request/reply loop always gets
    /// a frame.
    Ack,
}

impl DiscovererReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::QueueDepth(n) => {
                w.u64(*n);
            }
            Self::UsageStats(fractions) => {
                w.u16(fractions.len() as u16);
                for f in fractions {
                    w.u64(f.to_bits());
                }
            }
            Self::Ack => {}
        }
        w.into_bytes()
    }

    pub fn decode_queue_depth(buf: &[u8]) -> Result<u64> {
        Reader::new(buf).u64("pending_checks")
    }

    pub fn decode_usage_stats(buf: &[u8]) -> Result<Vec<f64>> {
        let mut r = Reader::new(buf);
        let n = r.u16("worker_num")?;
        let mut out = Vec::with_capacity(n as usize);
        for _ in 0..n {
            out.push(f64::from_bits(r.u64("fraction")?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_for_every_variant() {
        for req in [
            DiscovererRequest::Queue,
            DiscovererRequest::UsageStats,
            DiscovererRequest::SnmpCacheReload,
            DiscovererRequest::Shutdown,
        ] {
            let encoded = req.encode();
            assert_eq!(DiscovererRequest::decode(&encoded).unwrap(), req);
        }
    }

    #[test]
    fn usage_stats_reply_round_trips() {
        let reply = DiscovererReply::UsageStats(vec![0.0, 0.5, 1.0]);
        let encoded = reply.encode();
        let decoded = DiscovererReply::decode_usage_stats(&encoded).unwrap();
        assert_eq!(decoded, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn queue_depth_reply_round_trips() {
        let reply = DiscovererReply::QueueDepth(42);
        let encoded = reply.encode();
        assert_eq!(DiscovererReply::decode_queue_depth(&encoded).unwrap(), 42);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = DiscovererRequest::decode(&[99]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownCode(99)));
    }
}
