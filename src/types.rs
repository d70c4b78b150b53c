//! Core types and constants for Domain Unicast Address management.

use core::fmt;

// Memory bounds
pub const MAX_PROXY_CHILDREN: usize = 128; // slot indices fit u16 comfortably
pub(crate) const CHILD_MASK_WORDS: usize = MAX_PROXY_CHILDREN / 32;

// Timing constants (seconds unless noted)
pub const STATE_UPDATE_PERIOD_MS: u64 = 1000; // countdown tick
pub const NEW_PRIMARY_REGISTRATION_DELAY: u8 = 5; // wait for link establishment to a new Backbone Router
pub const DEFAULT_CHECK_DELAY: u8 = 1;
pub const DEFAULT_REGISTRATION_RETRY_DELAY: u8 = 5;
pub const MAX_REGISTRATION_RETRY_DELAY: u8 = 40;
pub const DEFAULT_REREGISTRATION_DELAY: u16 = 3600; // fallback when the primary advertises none

// Wire message types (see wire.rs; 3-255 dropped silently)
pub const MSG_REGISTRATION_REQUEST: u8 = 0;
pub const MSG_REGISTRATION_RESPONSE: u8 = 1;
pub const MSG_REGISTRATION_NOTICE: u8 = 2;

// Non-volatile settings keys
pub const KEY_DUA_IDENTIFIER: u16 = 0x0001;

/// 16-byte IPv6 address.
pub type Ip6Address = [u8; 16];

/// 64-bit IPv6 interface identifier.
pub type InterfaceIdentifier = [u8; 8];

/// Child slot index, stable for the lifetime of the child's attachment.
pub type ChildIndex = u16;

/// Whether an interface identifier falls in the reserved space.
///
/// Reserved values are the unspecified identifier (all zero, the
/// subnet-router anycast) and the locator space `0000:00ff:fe00:xxxx`.
pub fn is_reserved_iid(iid: &InterfaceIdentifier) -> bool {
    iid == &[0u8; 8] || iid[..6] == [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00]
}

/// The IPv6 prefix advertised by the Backbone Router infrastructure.
///
/// Only the high 64 bits participate in Domain Unicast Address formation;
/// `length` is the advertised prefix length in bits (at most 64).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainPrefix {
    /// High 64 bits of the prefix.
    pub bytes: [u8; 8],
    /// Prefix length in bits.
    pub length: u8,
}

impl DomainPrefix {
    /// Combine the prefix with an interface identifier into a full address.
    pub fn address_with_iid(&self, iid: &InterfaceIdentifier) -> Ip6Address {
        let mut addr = [0u8; 16];
        addr[..8].copy_from_slice(&self.bytes);
        addr[8..].copy_from_slice(iid);
        addr
    }
}

/// Read-only snapshot of the primary Backbone Router's service data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackboneRouterConfig {
    /// Mesh-short address of the server hosting the service.
    pub server: u16,
    /// Service sequence number; a bump means registrations must be redone.
    pub sequence_number: u8,
    /// Advertised re-registration cadence in seconds (0 = none advertised).
    pub reregistration_delay: u16,
    /// Multicast listener registration timeout in seconds.
    pub mlr_timeout: u32,
}

/// Registration lifecycle of the node's own Domain Unicast Address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuaState {
    /// No domain prefix, so no address exists.
    NotExist,
    /// Address pending (re-)registration.
    ToRegister,
    /// Registration request in flight.
    Registering,
    /// Address registered with the primary Backbone Router.
    Registered,
}

/// Operation carried by a registration request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationOp {
    /// Claim the address.
    Register,
    /// Release a previously-registered address.
    Release,
}

/// Status codes carried in registration responses and notices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Registration accepted.
    Success,
    /// Registrant must re-register (e.g. backbone state was lost).
    ReRegister,
    /// Target address is not a valid DUA.
    Invalid,
    /// Duplicate address detected on the backbone.
    Duplicate,
    /// Backbone Router is out of resources.
    NoResources,
    /// Responder is not the primary Backbone Router.
    NotPrimary,
    /// Unspecified failure.
    GeneralFailure,
}

impl RegistrationStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            RegistrationStatus::Success => 0,
            RegistrationStatus::ReRegister => 1,
            RegistrationStatus::Invalid => 2,
            RegistrationStatus::Duplicate => 3,
            RegistrationStatus::NoResources => 4,
            RegistrationStatus::NotPrimary => 5,
            RegistrationStatus::GeneralFailure => 6,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => RegistrationStatus::Success,
            1 => RegistrationStatus::ReRegister,
            2 => RegistrationStatus::Invalid,
            3 => RegistrationStatus::Duplicate,
            4 => RegistrationStatus::NoResources,
            5 => RegistrationStatus::NotPrimary,
            6 => RegistrationStatus::GeneralFailure,
            _ => return None,
        })
    }
}

/// Transport-level outcome of a request/response exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Peer responded; the payload carries the response.
    Ok,
    /// Retransmissions exhausted without a response.
    Timeout,
    /// Transport-level failure (unreachable peer, send error).
    Failure,
}

/// Domain prefix availability change from the topology collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainPrefixUpdate {
    /// A domain prefix became available.
    Added(DomainPrefix),
    /// The prefix was re-advertised, possibly with a different value.
    Refreshed(DomainPrefix),
    /// The domain prefix was withdrawn.
    Removed,
}

/// Primary Backbone Router change from the topology collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackbonePrimaryUpdate {
    /// A new primary was elected.
    Added(BackboneRouterConfig),
    /// The primary's service data changed (e.g. sequence bump).
    Changed(BackboneRouterConfig),
    /// No primary is currently elected.
    Removed,
}

/// Per-child DUA state change from the mesh-topology collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildDuaEvent {
    /// Child announced a DUA needing proxy registration.
    Added,
    /// Child's DUA changed; any prior registration is stale.
    Changed,
    /// Child detached or withdrew its DUA.
    Removed,
}

/// Mesh connectivity change relevant to backbone reachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    /// Node (re-)attached to the mesh.
    Attached,
    /// Node lost its parent / mesh connectivity.
    Detached,
}

/// Topology notifications accepted by the manager's update channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyUpdate {
    /// Domain prefix availability changed.
    DomainPrefix(DomainPrefixUpdate),
    /// Primary Backbone Router changed.
    BackbonePrimary(BackbonePrimaryUpdate),
    /// A child's DUA registration state changed.
    ChildDua {
        child_index: ChildIndex,
        event: ChildDuaEvent,
        dua: Ip6Address,
        ml_iid: InterfaceIdentifier,
    },
    /// Mesh connectivity changed.
    Mesh(MeshEvent),
}

/// Events emitted by the manager for the host to act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The DUA is registered; add it to the network interface.
    AddressAdded(Ip6Address),
    /// The DUA is gone; remove it from the network interface.
    AddressRemoved(Ip6Address),
    /// A proxy registration attempt for a child completed.
    ChildDuaRegistered {
        child_index: ChildIndex,
        status: RegistrationStatus,
    },
}

/// Error type for manager operations.
///
/// Protocol-level failures never surface here; they are absorbed into retry
/// scheduling. Only synchronous configuration errors reach the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A supplied fixed interface identifier is reserved or invalid.
    InvalidArgument,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

/// Monotonic counters for monitoring registration traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Registration requests handed to the transport.
    pub requests_sent: u32,
    /// Responses applied to a flow.
    pub responses_applied: u32,
    /// Responses dropped because no flow was expecting them.
    pub responses_stale: u32,
    /// Duplicate-address responses received.
    pub duplicates: u32,
    /// Timeout/failure dispositions received.
    pub failures: u32,
    /// Unsolicited notices accepted.
    pub notices: u32,
}
