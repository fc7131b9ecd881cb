//! Message model exchanged between clients and servers, and the [`Envelope`]
//! that carries an encoded message across the fabric.
//!
//! Messages are serde-tagged JSON. Anything that fails to decode (an unknown
//! `kind`, a missing required field) surfaces as [`MsgError::Decode`], which
//! receivers treat as malformed input.
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::{fmt, net::Ipv6Addr, str::FromStr};

/// default client priority when a message does not carry one
pub const DEFAULT_PRIORITY: i32 = 1;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Identifier of an endpoint (server or device) attached to the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address pool classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolId {
    /// desktop class devices
    Pc,
    /// phones, tablets
    Mobile,
    /// printers
    Printer,
    /// servers, routers and high priority clients
    Vip,
}

impl PoolId {
    /// every pool, in the order counters are reported
    pub const ALL: [PoolId; 4] = [PoolId::Pc, PoolId::Mobile, PoolId::Printer, PoolId::Vip];

    /// lowercase pool name
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolId::Pc => "pc",
            PoolId::Mobile => "mobile",
            PoolId::Printer => "printer",
            PoolId::Vip => "vip",
        }
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of device sending a SOLICIT. Unrecognized names decode to `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// desktop
    #[default]
    Pc,
    /// phone/tablet
    Mobile,
    /// printer
    Printer,
    /// server, always VIP
    Server,
    /// router, always VIP
    Router,
    /// anything else
    #[serde(other)]
    Unknown,
}

impl DeviceType {
    /// lowercase device type name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Pc => "pc",
            DeviceType::Mobile => "mobile",
            DeviceType::Printer => "printer",
            DeviceType::Server => "server",
            DeviceType::Router => "router",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl FromStr for DeviceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "pc" => DeviceType::Pc,
            "mobile" => DeviceType::Mobile,
            "printer" => DeviceType::Printer,
            "server" => DeviceType::Server,
            "router" => DeviceType::Router,
            _ => DeviceType::Unknown,
        })
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client asks for an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solicit {
    /// device class, defaults to pc
    #[serde(default)]
    pub device_type: DeviceType,
    /// higher is more urgent
    #[serde(default = "default_priority")]
    pub priority: i32,
}

/// Server offers an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertise {
    /// address offered to the client
    pub offered_address: Ipv6Addr,
    /// priority echoed from the SOLICIT
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// lease length the server would grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,
    /// advertising server
    pub server_id: NodeId,
    /// advertising server's name
    pub server_name: String,
}

/// Client claims an advertised address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// address from the ADVERTISE
    pub offered_address: Ipv6Addr,
    /// client priority
    #[serde(default = "default_priority")]
    pub priority: i32,
}

/// Client extends the address it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renew {
    /// address the client currently holds
    pub current_address: Ipv6Addr,
    /// client priority
    #[serde(default = "default_priority")]
    pub priority: i32,
}

/// Server confirms a lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// committed address
    pub confirmed_address: Ipv6Addr,
    /// lease length granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<u64>,
    /// replying server's name
    pub server_name: String,
}

/// Next counter of every pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolCounters {
    /// pc pool next counter
    pub pc: u64,
    /// mobile pool next counter
    pub mobile: u64,
    /// printer pool next counter
    pub printer: u64,
    /// vip pool next counter
    pub vip: u64,
}

impl PoolCounters {
    /// counter of one pool
    pub fn get(&self, pool: PoolId) -> u64 {
        match pool {
            PoolId::Pc => self.pc,
            PoolId::Mobile => self.mobile,
            PoolId::Printer => self.printer,
            PoolId::Vip => self.vip,
        }
    }

    /// mutable counter of one pool
    pub fn get_mut(&mut self, pool: PoolId) -> &mut u64 {
        match pool {
            PoolId::Pc => &mut self.pc,
            PoolId::Mobile => &mut self.mobile,
            PoolId::Printer => &mut self.printer,
            PoolId::Vip => &mut self.vip,
        }
    }
}

impl Default for PoolCounters {
    fn default() -> Self {
        Self {
            pc: 1,
            mobile: 1,
            printer: 1,
            vip: 1,
        }
    }
}

/// One replicated lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseEntry {
    /// leasing device
    pub device: NodeId,
    /// leased address
    pub address: Ipv6Addr,
    /// logical expiry in ms, only present when lease expiry is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

/// State snapshot pushed from the active server to its partner
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncPayload {
    /// pool counters of the sender
    pub counters: PoolCounters,
    /// full lease table of the sender
    #[serde(default)]
    pub leases: Vec<LeaseEntry>,
}

/// Every message kind carried on the fabric
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum Message {
    /// client -> server
    Solicit(Solicit),
    /// server -> client
    Advertise(Advertise),
    /// client -> server
    Request(Request),
    /// client -> server
    Renew(Renew),
    /// server -> client
    Reply(Reply),
    /// active server -> standby
    Sync(SyncPayload),
    /// active server -> standby
    Heartbeat,
}

impl Message {
    /// name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Solicit(_) => "SOLICIT",
            Message::Advertise(_) => "ADVERTISE",
            Message::Request(_) => "REQUEST",
            Message::Renew(_) => "RENEW",
            Message::Reply(_) => "REPLY",
            Message::Sync(_) => "SYNC",
            Message::Heartbeat => "HEARTBEAT",
        }
    }

    /// the priority a client attached, if this is a client message
    pub fn priority(&self) -> Option<i32> {
        match self {
            Message::Solicit(m) => Some(m.priority),
            Message::Request(m) => Some(m.priority),
            Message::Renew(m) => Some(m.priority),
            _ => None,
        }
    }
}

/// Errors encoding/decoding a [`Message`]
#[derive(Debug, Error)]
pub enum MsgError {
    /// payload bytes could not be decoded into a known message
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    /// message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An encoded message plus its source and (optional) destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    src: NodeId,
    dst: Option<NodeId>,
    payload: Bytes,
}

impl Envelope {
    /// Construct from raw bytes. `dst` of `None` means broadcast
    pub fn new(src: NodeId, dst: Option<NodeId>, payload: Bytes) -> Self {
        Envelope { src, dst, payload }
    }

    /// Encode `msg` into a new envelope
    pub fn from_msg(src: NodeId, dst: Option<NodeId>, msg: &Message) -> Result<Self, MsgError> {
        Ok(Envelope {
            src,
            dst,
            payload: serde_json::to_vec(msg).map_err(MsgError::Encode)?.into(),
        })
    }

    /// Decode the payload
    pub fn to_msg(&self) -> Result<Message, MsgError> {
        serde_json::from_slice(&self.payload).map_err(MsgError::Decode)
    }

    /// sender
    pub fn src(&self) -> NodeId {
        self.src
    }

    /// addressed receiver, `None` for broadcast
    pub fn dst(&self) -> Option<NodeId> {
        self.dst
    }

    /// true if this envelope is addressed to someone other than `me`
    pub fn is_misrouted(&self, me: NodeId) -> bool {
        matches!(self.dst, Some(dst) if dst != me)
    }

    /// raw payload
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solicit_defaults() {
        let msg: Message = serde_json::from_str(r#"{"kind":"SOLICIT"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Solicit(Solicit {
                device_type: DeviceType::Pc,
                priority: 1
            })
        );
    }

    #[test]
    fn unknown_device_type_is_not_an_error() {
        let msg: Message =
            serde_json::from_str(r#"{"kind":"SOLICIT","device_type":"toaster","priority":4}"#)
                .unwrap();
        match msg {
            Message::Solicit(s) => {
                assert_eq!(s.device_type, DeviceType::Unknown);
                assert_eq!(s.priority, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn request_without_address_is_malformed() {
        let env = Envelope::new(
            NodeId(7),
            None,
            Bytes::from_static(br#"{"kind":"REQUEST","priority":2}"#),
        );
        assert!(matches!(env.to_msg(), Err(MsgError::Decode(_))));
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let env = Envelope::new(NodeId(7), None, Bytes::from_static(br#"{"kind":"DECLINE"}"#));
        assert!(matches!(env.to_msg(), Err(MsgError::Decode(_))));
    }

    #[test]
    fn envelope_carries_heartbeat() {
        let env = Envelope::from_msg(NodeId(1), Some(NodeId(2)), &Message::Heartbeat).unwrap();
        assert_eq!(env.to_msg().unwrap(), Message::Heartbeat);
        assert!(env.is_misrouted(NodeId(3)));
        assert!(!env.is_misrouted(NodeId(2)));
    }

    #[test]
    fn device_type_from_str() {
        assert_eq!("Router".parse::<DeviceType>().unwrap(), DeviceType::Router);
        assert_eq!("fridge".parse::<DeviceType>().unwrap(), DeviceType::Unknown);
    }

    #[test]
    fn pool_counters_index() {
        let mut counters = PoolCounters::default();
        *counters.get_mut(PoolId::Printer) = 9;
        assert_eq!(counters.get(PoolId::Printer), 9);
        assert_eq!(counters.get(PoolId::Vip), 1);
    }
}
