#![forbid(unsafe_code)]
//! duanode - Domain Unicast Address management for mesh nodes.
//!
//! A mesh node bridging to an external IPv6 backbone through Backbone
//! Routers must generate a globally-routable address, register it with the
//! primary Backbone Router, and keep the registration alive across topology
//! changes - and, as a parent, do the same on behalf of children that cannot
//! reach the backbone themselves.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. It is built
//! for ESP32-class devices running an embassy async executor, and is equally
//! drivable synchronously: every handler is a run-to-completion method
//! taking an explicit `now`, so a deterministic harness can skip the async
//! loop entirely.
//!
//! # Key Properties
//!
//! - Four-state self-registration machine (NotExist, ToRegister,
//!   Registering, Registered) with duplicate-address collision handling
//! - Proxy registration for children, serialized through one in-flight slot
//! - A single shared timer: scheduled exactly when at least one countdown
//!   is armed
//! - Deterministic identifier generation from a persisted base and
//!   collision counter
//! - No fatal paths: sustained backbone unreachability degrades to a
//!   bounded-rate retry loop
//!
//! # Example (basic usage)
//!
//! ```ignore
//! use duanode::{DuaManager, DuaState, TopologyUpdate};
//! use duanode::traits::test_impls::{MemoryStore, MockClock, MockRandom, MockTransport};
//!
//! let mut manager = DuaManager::new(
//!     MockTransport::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     MemoryStore::new(),
//!     [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88], // mesh-local IID
//! );
//! manager.restore();
//!
//! assert_eq!(manager.state(), DuaState::NotExist);
//! assert!(manager.domain_unicast_address().is_none());
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! // Implement BackboneTransport, Clock, Random, Store for your platform...
//!
//! // let mut manager = DuaManager::new(transport, random, clock, store, ml_iid);
//! // manager.restore();
//!
//! // Spawn the manager's run loop
//! // spawn(async move {
//! //     manager.run().await;
//! // });
//!
//! // Feed topology changes
//! // manager.updates().send(TopologyUpdate::DomainPrefix(update)).await;
//!
//! // Apply interface changes
//! // match manager.events().receive().await { ... }
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (addresses, prefixes, status codes, events)
//! - [`wire`] - Registration message wire format
//! - [`traits`] - BackboneTransport, Clock, Random, Store traits
//! - [`manager`] - Main DuaManager struct, run loop, and timer coordination
//! - [`dua`] - Self-flow registration state machine
//! - [`proxy`] - Proxy registration scheduler for children
//! - [`children`] - Child slot bitmasks and address table
//! - [`delay`] - Shared countdown state
//! - [`config`] - Timing policy
//! - [`time`] - Timestamp and Duration types

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes deterministic mock implementations that are NOT suitable for production."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

#[macro_use]
pub mod debug;

pub mod children;
pub mod config;
pub mod delay;
pub mod dua;
pub mod manager;
pub mod proxy;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use children::{ChildDua, ChildDuaTable, ChildMask};
pub use config::{BackoffPolicy, DuaConfig};
pub use delay::DelayState;
pub use manager::DuaManager;
pub use time::{Duration, Timestamp};
pub use traits::{BackboneRx, BackboneTransport, Clock, Random, Store, TxRequest};
pub use types::{
    is_reserved_iid, BackbonePrimaryUpdate, BackboneRouterConfig, ChildDuaEvent, ChildIndex,
    Counters, Disposition, DomainPrefix, DomainPrefixUpdate, DuaState, Error, Event,
    InterfaceIdentifier, Ip6Address, MeshEvent, RegistrationOp, RegistrationStatus, TopologyUpdate,
};
pub use wire::{
    DecodeError, Message, RegistrationNotice, RegistrationRequest, RegistrationResponse,
};

// Re-export constants
pub use types::{
    DEFAULT_REREGISTRATION_DELAY, MAX_PROXY_CHILDREN, NEW_PRIMARY_REGISTRATION_DELAY,
    STATE_UPDATE_PERIOD_MS,
};

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use super::*;
    use crate::traits::test_impls::{MemoryStore, MockClock, MockRandom, MockTransport};

    /// Settings store shared between "reboots" of a manager.
    #[derive(Clone, Default)]
    struct SharedStore(Rc<RefCell<MemoryStore>>);

    impl Store for SharedStore {
        fn save(&mut self, key: u16, value: &[u8]) {
            self.0.borrow_mut().save(key, value);
        }

        fn load(&self, key: u16) -> Option<Vec<u8>> {
            self.0.borrow().load(key)
        }
    }

    type TestManager = DuaManager<MockTransport, MockRandom, MockClock, SharedStore>;

    const ML_IID: InterfaceIdentifier = [0x4a, 0x75, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

    fn test_prefix() -> DomainPrefix {
        DomainPrefix {
            bytes: [0xfd, 0x00, 0xab, 0xcd, 0x00, 0x00, 0x00, 0x01],
            length: 64,
        }
    }

    fn other_prefix() -> DomainPrefix {
        DomainPrefix {
            bytes: [0xfd, 0x00, 0xab, 0xcd, 0x00, 0x00, 0x00, 0x02],
            length: 64,
        }
    }

    fn bbr_config(sequence_number: u8) -> BackboneRouterConfig {
        BackboneRouterConfig {
            server: 0x2400,
            sequence_number,
            reregistration_delay: 3600,
            mlr_timeout: 3600,
        }
    }

    fn make_manager() -> TestManager {
        DuaManager::new(
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            SharedStore::default(),
            ML_IID,
        )
    }

    fn make_manager_with_store(store: SharedStore) -> TestManager {
        DuaManager::new(
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
            store,
            ML_IID,
        )
    }

    /// Advance time one second at a time, firing the timer when armed.
    fn tick(manager: &mut TestManager, now: &mut Timestamp, secs: u64) {
        for _ in 0..secs {
            *now = *now + Duration::from_secs(1);
            if manager.timer_armed() {
                manager.handle_timer(*now);
            }
        }
    }

    /// Bring the manager to a sent self registration: primary, then prefix.
    fn start_self_registration(manager: &mut TestManager, now: Timestamp) -> Ip6Address {
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);
        manager.handle_domain_prefix_update(DomainPrefixUpdate::Added(test_prefix()), now);
        assert_eq!(manager.state(), DuaState::Registering);
        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        sent[0].target
    }

    fn inject_response(
        manager: &mut TestManager,
        target: Ip6Address,
        status: RegistrationStatus,
        now: Timestamp,
    ) {
        manager.handle_backbone_rx(
            BackboneRx::Exchange {
                target,
                disposition: Disposition::Ok,
                payload: RegistrationResponse { status, target }.encode_to_vec(),
            },
            now,
        );
    }

    fn drain_events(manager: &mut TestManager) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = manager.events().try_receive() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_manager_starts_idle() {
        let manager = make_manager();
        assert_eq!(manager.state(), DuaState::NotExist);
        assert!(manager.domain_unicast_address().is_none());
        assert!(!manager.timer_armed());
        assert!(manager.child_pending_mask().is_empty());
    }

    /// Full acquisition: prefix available -> NotExist -> ToRegister -> Registering
    /// -> (success) -> Registered, and the address is surfaced.
    #[test]
    fn test_prefix_to_registered() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        assert_eq!(&target[..8], &test_prefix().bytes);

        // The request carries our mesh-local IID and a Register op.
        inject_response(&mut manager, target, RegistrationStatus::Success, now);

        assert_eq!(manager.state(), DuaState::Registered);
        assert_eq!(manager.domain_unicast_address(), Some(target));
        assert_eq!(drain_events(&mut manager), [Event::AddressAdded(target)]);
        // Re-registration cadence is armed, so the timer runs.
        assert!(manager.timer_armed());
    }

    #[test]
    fn test_request_contents() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);
        manager.handle_domain_prefix_update(DomainPrefixUpdate::Added(test_prefix()), now);

        let sent = manager.transport().take_sent();
        match Message::decode_from_slice(&sent[0].data).unwrap() {
            Message::Request(request) => {
                assert_eq!(request.op, RegistrationOp::Register);
                assert_eq!(request.ml_iid, ML_IID);
                assert_eq!(request.target, sent[0].target);
                assert_eq!(request.last_transaction_secs, 0);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    /// Duplicate response increments the counter by one and the
    /// regenerated identifier differs from the rejected one.
    #[test]
    fn test_duplicate_regenerates_identifier() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);

        let rejected = start_self_registration(&mut manager, now);
        assert_eq!(manager.dad_counter(), 0);

        inject_response(&mut manager, rejected, RegistrationStatus::Duplicate, now);

        assert_eq!(manager.dad_counter(), 1);
        assert_eq!(manager.state(), DuaState::ToRegister);
        let regenerated = manager.domain_unicast_address().unwrap();
        assert_ne!(regenerated, rejected);
        // Retry goes out once the registration delay elapses.
        assert!(manager.timer_armed());
        tick(&mut manager, &mut now, DuaConfig::default().registration_retry_delay as u64);
        assert_eq!(manager.state(), DuaState::Registering);
        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, regenerated);
    }

    #[test]
    fn test_repeated_duplicates_never_repeat_identifier() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);

        let mut rejected = Vec::new();
        rejected.push(start_self_registration(&mut manager, now));

        for round in 1..=5u8 {
            let current = *rejected.last().unwrap();
            inject_response(&mut manager, current, RegistrationStatus::Duplicate, now);
            assert_eq!(manager.dad_counter(), round);

            let fresh = manager.domain_unicast_address().unwrap();
            assert!(!rejected.contains(&fresh), "identifier repeated in round {round}");
            rejected.push(fresh);

            tick(&mut manager, &mut now, DuaConfig::default().registration_retry_delay as u64);
            assert_eq!(manager.state(), DuaState::Registering);
            manager.transport().take_sent();
        }
    }

    /// Children in slots {1, 3, 4} register one at a time in
    /// round-robin order, ending with Registered = {1, 3, 4}, Pending = {}.
    #[test]
    fn test_children_register_one_at_a_time() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        for slot in [1u16, 3, 4] {
            let mut dua = [0u8; 16];
            dua[0] = 0xfd;
            dua[15] = slot as u8;
            manager.update_child_dua(slot, ChildDuaEvent::Added, dua, [slot as u8; 8], now);
        }
        assert_eq!(manager.child_pending_mask().count(), 3);
        assert!(manager.registering_child().is_none());
        assert!(manager.timer_armed());

        let mut serviced = Vec::new();
        tick(&mut manager, &mut now, 1);
        while let Some(index) = manager.registering_child() {
            serviced.push(index);
            let sent = manager.transport().take_sent();
            assert_eq!(sent.len(), 1, "exactly one request in flight");
            inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        }

        assert_eq!(serviced, [1, 3, 4]);
        assert!(manager.child_pending_mask().is_empty());
        let registered: Vec<_> = manager.child_registered_mask().iter().collect();
        assert_eq!(registered, [1, 3, 4]);
        // Nothing left to do: every countdown idle, timer disarmed.
        assert!(!manager.timer_armed());

        let events = drain_events(&mut manager);
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(
            e,
            Event::ChildDuaRegistered {
                status: RegistrationStatus::Success,
                ..
            }
        )));
    }

    /// A new primary while Registered resets to ToRegister and
    /// re-registers after the new-router delay, not the re-registration
    /// cadence.
    #[test]
    fn test_new_primary_triggers_fresh_registration() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::Registered);

        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(7)), now);
        assert_eq!(manager.state(), DuaState::ToRegister);

        tick(&mut manager, &mut now, NEW_PRIMARY_REGISTRATION_DELAY as u64);
        assert_eq!(manager.state(), DuaState::Registering);
        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, target);
    }

    /// A reserved fixed identifier is rejected synchronously
    /// with no state change.
    #[test]
    fn test_reserved_fixed_identifier_rejected() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);
        let target = start_self_registration(&mut manager, now);

        let reserved = [0x00, 0x00, 0x00, 0xff, 0xfe, 0x00, 0x12, 0x34];
        assert_eq!(
            manager.set_fixed_dua_interface_identifier(reserved, now),
            Err(Error::InvalidArgument)
        );
        assert!(!manager.is_fixed_dua_interface_identifier_set());
        assert_eq!(manager.state(), DuaState::Registering);
        assert_eq!(manager.domain_unicast_address(), Some(target));
    }

    #[test]
    fn test_fixed_identifier_used_verbatim() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let fixed = [0x02, 0x00, 0x5e, 0xef, 0x10, 0x20, 0x30, 0x40];
        manager.set_fixed_dua_interface_identifier(fixed, now).unwrap();
        assert!(manager.is_fixed_dua_interface_identifier_set());

        let target = start_self_registration(&mut manager, now);
        assert_eq!(&target[8..], &fixed);
    }

    /// Idempotence: a success for a flow with no outstanding request is
    /// discarded, not applied.
    #[test]
    fn test_stale_success_is_ignored() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::Registered);
        drain_events(&mut manager);

        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::Registered);
        assert_eq!(manager.counters().responses_stale, 1);
        assert!(drain_events(&mut manager).is_empty());
    }

    /// Store/Restore round-trip: the identifier survives a reboot.
    #[test]
    fn test_identifier_survives_restart() {
        let store = SharedStore::default();
        let now = Timestamp::from_secs(1);

        let first_dua = {
            let mut manager = make_manager_with_store(store.clone());
            manager.restore();
            let target = start_self_registration(&mut manager, now);
            inject_response(&mut manager, target, RegistrationStatus::Success, now);
            target
        };

        let mut rebooted = make_manager_with_store(store);
        rebooted.restore();
        let target = start_self_registration(&mut rebooted, now);
        assert_eq!(target, first_dua);
    }

    #[test]
    fn test_prefix_withdrawal_removes_address() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        drain_events(&mut manager);

        manager.handle_domain_prefix_update(DomainPrefixUpdate::Removed, now);
        assert_eq!(manager.state(), DuaState::NotExist);
        assert!(manager.domain_unicast_address().is_none());
        assert_eq!(drain_events(&mut manager), [Event::AddressRemoved(target)]);
        assert!(!manager.timer_armed());
    }

    /// Cancellation: a response arriving after the prefix was withdrawn
    /// mid-flight is discarded rather than applied to stale state.
    #[test]
    fn test_response_after_withdrawal_is_discarded() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        manager.handle_domain_prefix_update(DomainPrefixUpdate::Removed, now);
        assert_eq!(manager.state(), DuaState::NotExist);

        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::NotExist);
        assert_eq!(manager.counters().responses_stale, 1);
        assert!(drain_events(&mut manager).is_empty());
    }

    #[test]
    fn test_superseding_prefix_regenerates() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let old = start_self_registration(&mut manager, now);
        inject_response(&mut manager, old, RegistrationStatus::Success, now);
        drain_events(&mut manager);

        manager.handle_domain_prefix_update(DomainPrefixUpdate::Refreshed(other_prefix()), now);
        assert_eq!(manager.state(), DuaState::Registering);
        let fresh = manager.domain_unicast_address().unwrap();
        assert_eq!(&fresh[..8], &other_prefix().bytes);
        // Same identifier under the new prefix.
        assert_eq!(fresh[8..], old[8..]);
        assert_eq!(drain_events(&mut manager), [Event::AddressRemoved(old)]);
    }

    #[test]
    fn test_registration_failure_retries_with_backoff() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        manager.handle_backbone_rx(
            BackboneRx::Exchange {
                target,
                disposition: Disposition::Timeout,
                payload: Vec::new(),
            },
            now,
        );
        assert_eq!(manager.state(), DuaState::ToRegister);
        assert_eq!(manager.counters().failures, 1);
        assert!(manager.timer_armed());

        // One second short of the retry delay: still waiting.
        tick(&mut manager, &mut now, DuaConfig::default().registration_retry_delay as u64 - 1);
        assert_eq!(manager.state(), DuaState::ToRegister);
        tick(&mut manager, &mut now, 1);
        assert_eq!(manager.state(), DuaState::Registering);
    }

    #[test]
    fn test_reregistration_cadence_elapses() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::Registered);

        // The jittered cadence lands in [7/8 * 3600, 3600].
        tick(&mut manager, &mut now, 3600);
        assert_eq!(manager.state(), DuaState::Registering);
        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, target);
        // The re-registration request reports time since last transaction.
        match Message::decode_from_slice(&sent[0].data).unwrap() {
            Message::Request(request) => assert!(request.last_transaction_secs > 0),
            other => panic!("expected request, got {other:?}"),
        }
    }

    /// An unsolicited notice forces immediate re-registration, bypassing
    /// the armed delays.
    #[test]
    fn test_notice_forces_reregistration() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::Registered);
        manager.transport().take_sent();

        manager.handle_backbone_rx(
            BackboneRx::Unsolicited {
                payload: RegistrationNotice {
                    status: RegistrationStatus::ReRegister,
                    target,
                }
                .encode_to_vec(),
            },
            now,
        );

        assert_eq!(manager.state(), DuaState::Registering);
        assert_eq!(manager.transport().take_sent().len(), 1);
        assert_eq!(manager.counters().notices, 1);
    }

    #[test]
    fn test_notice_for_child_requeues_it() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        let mut child_dua = [0u8; 16];
        child_dua[0] = 0xfd;
        child_dua[15] = 9;
        manager.update_child_dua(9, ChildDuaEvent::Added, child_dua, [9; 8], now);
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();
        inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        assert!(manager.child_registered_mask().get(9));
        drain_events(&mut manager);

        manager.handle_backbone_rx(
            BackboneRx::Unsolicited {
                payload: RegistrationNotice {
                    status: RegistrationStatus::ReRegister,
                    target: child_dua,
                }
                .encode_to_vec(),
            },
            now,
        );

        // The slot went back to pending and was re-submitted immediately.
        assert!(!manager.child_registered_mask().get(9));
        assert_eq!(manager.registering_child(), Some(9));
        assert_eq!(manager.transport().take_sent().len(), 1);
    }

    #[test]
    fn test_child_removal_releases_registration() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        let mut child_dua = [0u8; 16];
        child_dua[0] = 0xfd;
        child_dua[15] = 2;
        manager.update_child_dua(2, ChildDuaEvent::Added, child_dua, [2; 8], now);
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();
        inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        assert!(manager.child_registered_mask().get(2));
        drain_events(&mut manager);

        manager.update_child_dua(2, ChildDuaEvent::Removed, child_dua, [2; 8], now);
        tick(&mut manager, &mut now, 1);

        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        match Message::decode_from_slice(&sent[0].data).unwrap() {
            Message::Request(request) => assert_eq!(request.op, RegistrationOp::Release),
            other => panic!("expected request, got {other:?}"),
        }

        inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        assert!(manager.child_pending_mask().is_empty());
        assert!(manager.child_registered_mask().is_empty());
        assert!(!manager.timer_armed());
    }

    #[test]
    fn test_child_failure_leaves_slot_pending() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        let mut child_dua = [0u8; 16];
        child_dua[0] = 0xfd;
        child_dua[15] = 5;
        manager.update_child_dua(5, ChildDuaEvent::Added, child_dua, [5; 8], now);
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();

        inject_response(&mut manager, sent[0].target, RegistrationStatus::NoResources, now);
        assert!(manager.registering_child().is_none());
        assert!(manager.child_pending_mask().get(5));
        // The check delay throttles the retry; the timer stays armed.
        assert!(manager.timer_armed());

        tick(&mut manager, &mut now, 1);
        assert_eq!(manager.registering_child(), Some(5));
    }

    /// A child whose DUA changes while its registration is in flight is
    /// re-submitted immediately after the stale outcome lands.
    #[test]
    fn test_child_changed_in_flight_resubmits() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        let mut old_dua = [0u8; 16];
        old_dua[0] = 0xfd;
        old_dua[15] = 0x10;
        manager.update_child_dua(6, ChildDuaEvent::Added, old_dua, [6; 8], now);
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();
        assert_eq!(sent[0].target, old_dua);

        let mut new_dua = old_dua;
        new_dua[15] = 0x11;
        manager.update_child_dua(6, ChildDuaEvent::Changed, new_dua, [6; 8], now);

        inject_response(&mut manager, old_dua, RegistrationStatus::Success, now);

        // The stale success did not mark the slot registered; the new
        // address went out instead.
        assert!(!manager.child_registered_mask().get(6));
        assert_eq!(manager.registering_child(), Some(6));
        let sent = manager.transport().take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, new_dua);
    }

    #[test]
    fn test_sequence_bump_requeues_children() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);

        let mut child_dua = [0u8; 16];
        child_dua[0] = 0xfd;
        child_dua[15] = 3;
        manager.update_child_dua(3, ChildDuaEvent::Added, child_dua, [3; 8], now);
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();
        inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        assert!(manager.child_registered_mask().get(3));

        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Changed(bbr_config(2)), now);
        assert!(!manager.child_registered_mask().get(3));
        // Re-submitted without waiting for a tick.
        assert_eq!(manager.registering_child(), Some(3));
    }

    #[test]
    fn test_detach_cancels_in_flight() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        let target = start_self_registration(&mut manager, now);
        manager.handle_mesh_event(MeshEvent::Detached, now);
        assert_eq!(manager.state(), DuaState::ToRegister);

        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert_eq!(manager.state(), DuaState::ToRegister);
        assert_eq!(manager.counters().responses_stale, 1);

        manager.handle_mesh_event(MeshEvent::Attached, now);
        assert_eq!(manager.state(), DuaState::Registering);
    }

    #[test]
    fn test_no_registration_without_primary() {
        let mut manager = make_manager();
        let now = Timestamp::from_secs(1);

        manager.handle_domain_prefix_update(DomainPrefixUpdate::Added(test_prefix()), now);
        assert_eq!(manager.state(), DuaState::ToRegister);
        assert!(manager.transport().take_sent().is_empty());

        manager.handle_backbone_primary_update(BackbonePrimaryUpdate::Added(bbr_config(1)), now);
        // New-primary delay applies before the first request goes out.
        assert_eq!(manager.state(), DuaState::ToRegister);
        assert!(manager.timer_armed());
    }

    #[test]
    fn test_timer_armed_iff_countdown_armed() {
        let mut manager = make_manager();
        let mut now = Timestamp::from_secs(1);
        assert!(!manager.timer_armed());

        // Registering immediately arms nothing: the request is in flight.
        let target = start_self_registration(&mut manager, now);
        assert!(!manager.timer_armed());

        // Registered arms the re-registration cadence.
        inject_response(&mut manager, target, RegistrationStatus::Success, now);
        assert!(manager.timer_armed());

        // Withdrawal clears every countdown.
        manager.handle_domain_prefix_update(DomainPrefixUpdate::Removed, now);
        assert!(!manager.timer_armed());

        // A child update arms the check delay; completing the work disarms.
        let mut child_dua = [0u8; 16];
        child_dua[0] = 0xfd;
        child_dua[15] = 1;
        manager.update_child_dua(1, ChildDuaEvent::Added, child_dua, [1; 8], now);
        assert!(manager.timer_armed());
        tick(&mut manager, &mut now, 1);
        let sent = manager.transport().take_sent();
        inject_response(&mut manager, sent[0].target, RegistrationStatus::Success, now);
        assert!(!manager.timer_armed());
    }
}
