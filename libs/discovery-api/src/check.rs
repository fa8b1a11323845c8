//! Check definitions: what a discovery rule probes for, one entry per
//! `Check` in `rule.checks[]`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::iprange::PortRange;
use utils::id::DCheckId;

/// Which batch driver a [`CheckType`] is dispatched through, kept as a
/// property of the enum instead of a match spread across every call site
/// that cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum BatchKind {
    /// One `(ip, port, check)` triple resolved and probed at a time.
    Sync,
    /// All IPs in a task's range pinged in one batched ICMP sweep.
    Icmp,
    /// Dispatched through the shared async multiplexer (TCP family, HTTP(S), SNMP).
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum CheckType {
    Icmp,
    Agent,
    Tcp,
    Smtp,
    Ftp,
    Pop,
    Imap,
    Nntp,
    Http,
    Https,
    Ssh,
    Telnet,
    Ldap,
    SnmpV1,
    SnmpV2c,
    SnmpV3,
}

impl CheckType {
    pub fn batch_kind(self) -> BatchKind {
        match self {
            CheckType::Icmp => BatchKind::Icmp,
            CheckType::Tcp
            | CheckType::Smtp
            | CheckType::Ftp
            | CheckType::Pop
            | CheckType::Imap
            | CheckType::Nntp
            | CheckType::Http
            | CheckType::Https
            | CheckType::Ssh
            | CheckType::Telnet
            | CheckType::Ldap
            | CheckType::SnmpV1
            | CheckType::SnmpV2c
            | CheckType::SnmpV3 => BatchKind::Async,
            CheckType::Agent => BatchKind::Sync,
        }
    }

    pub fn is_snmp(self) -> bool {
        matches!(self, CheckType::SnmpV1 | CheckType::SnmpV2c | CheckType::SnmpV3)
    }

    pub fn is_snmpv3(self) -> bool {
        matches!(self, CheckType::SnmpV3)
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            CheckType::Icmp | CheckType::Agent => None,
            CheckType::Tcp => None,
            CheckType::Smtp => Some(25),
            CheckType::Ftp => Some(21),
            CheckType::Pop => Some(110),
            CheckType::Imap => Some(143),
            CheckType::Nntp => Some(119),
            CheckType::Http => Some(80),
            CheckType::Https => Some(443),
            CheckType::Ssh => Some(22),
            CheckType::Telnet => Some(23),
            CheckType::Ldap => Some(389),
            CheckType::SnmpV1 | CheckType::SnmpV2c | CheckType::SnmpV3 => Some(161),
        }
    }
}

/// Per-check-type parameters, as a tagged enum rather than one struct with
/// a union of rarely-used fields, so an HTTP check can't accidentally carry
/// an SNMP community string. Only the variant matching the owning
/// [`Check::check_type`] is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CheckParams {
    #[default]
    None,
    Http {
        path: String,
        expect_substring: Option<String>,
    },
    Snmp {
        community: Option<String>,
        v3_security_name: Option<String>,
        v3_auth_passphrase: Option<String>,
        oid: String,
    },
    Agent {
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub dcheckid: DCheckId,
    pub check_type: CheckType,
    pub ports: PortRange,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub params: CheckParams,
    /// When set, a responding host on this check is used to derive the
    /// discovered host's canonical name/uniqueness key (`unique_dcheckid`
    /// on [`crate::result::ServiceResult`]).
    pub uniqueness_criteria: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub dcheckid: DCheckId,
    pub check_type: CheckType,
    pub port: u16,
    pub status: ServiceStatus,
    /// Free-form probe output (banner, SNMP value, HTTP response snippet).
    pub value: String,
}
