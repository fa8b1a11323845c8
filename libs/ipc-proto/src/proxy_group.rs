//! Wire messages for the ProxyGroupManager IPC endpoint: host-to-proxy
//! redirect bookkeeping and group status.

use crate::codec::{CodecError, Reader, Result, Writer};
use utils::id::{HostId, ProxyGroupId, ProxyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProxyGroupOp {
    HostPgroupUpdate = 1,
    GetProxySyncData = 2,
    GetStats = 3,
    ProxyLastaccess = 4,
    Stop = 5,
}

impl ProxyGroupOp {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Self::HostPgroupUpdate,
            2 => Self::GetProxySyncData,
            3 => Self::GetStats,
            4 => Self::ProxyLastaccess,
            5 => Self::Stop,
            other => return Err(CodecError::UnknownCode(other)),
        })
    }
}

/// One `(hostid, src_groupid, dst_groupid)` relocation within a
/// `HOST_PGROUP_UPDATE` batch; `src_groupid`/`dst_groupid` of `0` means "no
/// prior group" / "remove from all groups."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPgroupRelocation {
    pub hostid: HostId,
    pub src_groupid: ProxyGroupId,
    pub dst_groupid: ProxyGroupId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProxyGroupRequest {
    /// A sequence of hosts that moved between proxy groups, batched into
    /// one notify frame.
    HostPgroupUpdate(Vec<HostPgroupRelocation>),
    GetProxySyncData {
        proxyid: ProxyId,
        /// Last revision this proxy already has; `0` forces a full resync.
        known_revision: u64,
    },
    GetStats {
        group_name: String,
    },
    ProxyLastaccess {
        proxyid: ProxyId,
        unixtime: u64,
    },
    Stop,
}

impl ProxyGroupRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::HostPgroupUpdate(relocations) => {
                w.u8(ProxyGroupOp::HostPgroupUpdate as u8);
                w.u32(relocations.len() as u32);
                for r in relocations {
                    w.u64(r.hostid.get());
                    w.u64(r.src_groupid.get());
                    w.u64(r.dst_groupid.get());
                }
            }
            Self::GetProxySyncData {
                proxyid,
                known_revision,
            } => {
                w.u8(ProxyGroupOp::GetProxySyncData as u8);
                w.u64(proxyid.get());
                w.u64(*known_revision);
            }
            Self::GetStats { group_name } => {
                w.u8(ProxyGroupOp::GetStats as u8);
                w.string(group_name);
            }
            Self::ProxyLastaccess { proxyid, unixtime } => {
                w.u8(ProxyGroupOp::ProxyLastaccess as u8);
                w.u64(proxyid.get());
                w.u64(*unixtime);
            }
            Self::Stop => {
                w.u8(ProxyGroupOp::Stop as u8);
            }
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        Ok(match ProxyGroupOp::from_u8(r.u8("op")?)? {
            ProxyGroupOp::HostPgroupUpdate => {
                let n = r.u32("relocation_count")? as usize;
                let mut relocations = Vec::with_capacity(n);
                for _ in 0..n {
                    relocations.push(HostPgroupRelocation {
                        hostid: HostId::new(r.u64("hostid")?),
                        src_groupid: ProxyGroupId::new(r.u64("src_groupid")?),
                        dst_groupid: ProxyGroupId::new(r.u64("dst_groupid")?),
                    });
                }
                Self::HostPgroupUpdate(relocations)
            }
            ProxyGroupOp::GetProxySyncData => Self::GetProxySyncData {
                proxyid: ProxyId::new(r.u64("proxyid")?),
                known_revision: r.u64("known_revision")?,
            },
            ProxyGroupOp::GetStats => Self::GetStats {
                group_name: r.string("group_name")?,
            },
            ProxyGroupOp::ProxyLastaccess => Self::ProxyLastaccess {
                proxyid: ProxyId::new(r.u64("proxyid")?),
                unixtime: r.u64("unixtime")?,
            },
            ProxyGroupOp::Stop => Self::Stop,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncKind {
    None = 0,
    Partial = 1,
    Full = 2,
}

impl SyncKind {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::None,
            1 => Self::Partial,
            2 => Self::Full,
            other => return Err(CodecError::UnknownCode(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxySyncData {
    pub kind: SyncKind,
    pub revision: u64,
    /// `Full`: every host currently assigned to the proxy. `Partial`: hosts
    /// removed since `known_revision`. `None`: empty.
    pub hostids: Vec<HostId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyGroupStats {
    pub state: i32,
    pub online_num: i32,
    pub proxyids: Vec<ProxyId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProxyGroupReply {
    SyncData(ProxySyncData),
    /// `None` is encoded as the bare `i32 -1` not-found sentinel.
    Stats(Option<ProxyGroupStats>),
    Ack,
}

impl ProxyGroupReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Self::SyncData(d) => {
                w.u8(d.kind as u8);
                w.u64(d.revision);
                w.u32(d.hostids.len() as u32);
                for h in &d.hostids {
                    w.u64(h.get());
                }
            }
            Self::Stats(None) => {
                w.i32(-1);
            }
            Self::Stats(Some(s)) => {
                w.i32(s.state);
                w.i32(s.online_num);
                w.i32(s.proxyids.len() as i32);
                for id in &s.proxyids {
                    w.u64(id.get());
                }
            }
            Self::Ack => {}
        }
        w.into_bytes()
    }

    pub fn decode_sync_data(buf: &[u8]) -> Result<ProxySyncData> {
        let mut r = Reader::new(buf);
        let kind = SyncKind::from_u8(r.u8("kind")?)?;
        let revision = r.u64("revision")?;
        let n = r.u32("host_count")? as usize;
        let mut hostids = Vec::with_capacity(n);
        for _ in 0..n {
            hostids.push(HostId::new(r.u64("hostid")?));
        }
        Ok(ProxySyncData {
            kind,
            revision,
            hostids,
        })
    }

    pub fn decode_stats(buf: &[u8]) -> Result<Option<ProxyGroupStats>> {
        let mut r = Reader::new(buf);
        let state = r.i32("state")?;
        if state == -1 {
            return Ok(None);
        }
        let online_num = r.i32("online_num")?;
        let n = r.i32("proxies_num")? as usize;
        let mut proxyids = Vec::with_capacity(n);
        for _ in 0..n {
            proxyids.push(ProxyId::new(r.u64("proxyid")?));
        }
        Ok(Some(ProxyGroupStats { state, online_num, proxyids }))
    }
}
