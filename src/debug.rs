//! Debug events for registration tracing.
//!
//! Enabled with the `debug` feature. These events help trace the state
//! machine during simulation and testing; the manager buffers them and a
//! harness drains the buffer via `take_debug_events()`.

use crate::types::{
    ChildIndex, DuaState, InterfaceIdentifier, Ip6Address, RegistrationOp, RegistrationStatus,
};

/// Debug events emitted by the manager for protocol tracing.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// Self-flow state transition.
    StateChanged { from: DuaState, to: DuaState },
    /// A candidate interface identifier was produced.
    IdentifierGenerated {
        iid: InterfaceIdentifier,
        dad_counter: u8,
    },
    /// A registration request was handed to the transport.
    RequestQueued {
        target: Ip6Address,
        op: RegistrationOp,
    },
    /// An exchange outcome was applied to a flow.
    OutcomeApplied {
        target: Ip6Address,
        status: Option<RegistrationStatus>,
    },
    /// An exchange outcome arrived with no flow expecting it.
    OutcomeStale { target: Ip6Address },
    /// An unsolicited notice was accepted.
    NoticeReceived {
        target: Ip6Address,
        status: RegistrationStatus,
    },
    /// The proxy scan picked a child slot.
    ChildPicked { child_index: ChildIndex },
    /// The shared timer was (re-)evaluated.
    TimerRescheduled { armed: bool },
}

#[cfg(feature = "debug")]
macro_rules! emit_debug {
    ($mgr:expr, $event:expr) => {
        $mgr.emit_debug_event($event)
    };
}

#[cfg(not(feature = "debug"))]
macro_rules! emit_debug {
    ($mgr:expr, $event:expr) => {};
}
