//! Manager implementation - the main registration state machine.
//!
//! The DuaManager struct holds all protocol state and provides an async
//! `run()` method that drives it. It is fully event-driven:
//! - Exchange outcomes and unsolicited notices arrive from the transport
//! - Topology updates arrive on the update channel
//! - A single shared timer drives the packed countdowns
//!
//! Every handler is a synchronous run-to-completion method taking an
//! explicit `now`, so a deterministic harness can drive the manager without
//! the async loop by calling the handlers directly.
//!
//! # Usage
//!
//! ```ignore
//! let mut manager = DuaManager::new(transport, random, clock, store, ml_iid);
//! manager.restore();
//!
//! // Spawn the manager's run loop
//! spawn(async move {
//!     manager.run().await;
//! });
//!
//! // Feed topology changes
//! manager.updates().send(TopologyUpdate::DomainPrefix(update)).await;
//!
//! // Apply interface changes
//! let event = manager.events().receive().await;
//! ```

use crate::children::{ChildDuaTable, ChildMask};
use crate::config::DuaConfig;
use crate::delay::DelayState;
use crate::time::{Duration, Timestamp};
use crate::traits::{
    BackboneRx, BackboneTransport, Clock, EventChannel, Random, Store, TxRequest, UpdateChannel,
};
use crate::types::{
    BackboneRouterConfig, ChildIndex, Counters, Disposition, DomainPrefix, DuaState, Event,
    InterfaceIdentifier, Ip6Address, RegistrationOp, RegistrationStatus, TopologyUpdate,
    MAX_PROXY_CHILDREN, STATE_UPDATE_PERIOD_MS,
};
use crate::wire::{Message, RegistrationNotice, RegistrationRequest};

#[cfg(feature = "debug")]
use crate::debug::DebugEvent;

/// The Domain Unicast Address manager.
///
/// Generic over:
/// - `T`: Backbone transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `S`: Non-volatile settings store
///
/// The manager is fully event-driven. Call `run()` to start the main loop,
/// or drive the `handle_*` methods directly with an explicit timestamp.
pub struct DuaManager<T, R, Clk, S> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) random: R,
    clock: Clk,
    pub(crate) store: S,
    pub(crate) config: DuaConfig,

    // Channels
    updates: UpdateChannel,
    events: EventChannel,

    // Identity
    pub(crate) ml_iid: InterfaceIdentifier,

    // Topology snapshots
    pub(crate) domain_prefix: Option<DomainPrefix>,
    pub(crate) primary: Option<BackboneRouterConfig>,
    pub(crate) attached: bool,

    // Self flow
    pub(crate) dua_state: DuaState,
    pub(crate) dua: Option<Ip6Address>,
    pub(crate) address_added: bool,
    pub(crate) fixed_iid: Option<InterfaceIdentifier>,
    pub(crate) iid_base: Option<InterfaceIdentifier>,
    pub(crate) dad_counter: u8,
    pub(crate) failed_attempts: u8,
    pub(crate) last_registration_time: Option<Timestamp>,

    // Proxy flow
    pub(crate) children: ChildDuaTable,
    pub(crate) child_pending: ChildMask,
    pub(crate) child_registered: ChildMask,
    pub(crate) child_registering: Option<ChildIndex>,
    pub(crate) register_current_child: bool,
    pub(crate) last_serviced_child: ChildIndex,

    // Shared timer
    pub(crate) delays: DelayState,
    timer_at: Option<Timestamp>,
    last_tick: Timestamp,

    counters: Counters,

    #[cfg(feature = "debug")]
    debug_events: alloc::vec::Vec<DebugEvent>,
}

impl<T, R, Clk, S> DuaManager<T, R, Clk, S>
where
    T: BackboneTransport,
    R: Random,
    Clk: Clock,
    S: Store,
{
    /// Create a manager with the default timing policy.
    ///
    /// `ml_iid` is the node's mesh-local interface identifier, carried in
    /// self-flow registration requests.
    pub fn new(transport: T, random: R, clock: Clk, store: S, ml_iid: InterfaceIdentifier) -> Self {
        Self::with_config(transport, random, clock, store, ml_iid, DuaConfig::default())
    }

    /// Create a manager with an explicit timing policy.
    pub fn with_config(
        transport: T,
        random: R,
        clock: Clk,
        store: S,
        ml_iid: InterfaceIdentifier,
        config: DuaConfig,
    ) -> Self {
        Self {
            transport,
            random,
            clock,
            store,
            config,

            updates: UpdateChannel::new(),
            events: EventChannel::new(),

            ml_iid,

            domain_prefix: None,
            primary: None,
            attached: true,

            dua_state: DuaState::NotExist,
            dua: None,
            address_added: false,
            fixed_iid: None,
            iid_base: None,
            dad_counter: 0,
            failed_attempts: 0,
            last_registration_time: None,

            children: ChildDuaTable::new(),
            child_pending: ChildMask::new(),
            child_registered: ChildMask::new(),
            child_registering: None,
            register_current_child: false,
            // Start just before slot 0 so the first scan services slot 0 first.
            last_serviced_child: (MAX_PROXY_CHILDREN - 1) as ChildIndex,

            delays: DelayState::new(),
            timer_at: None,
            last_tick: Timestamp::ZERO,

            counters: Counters::default(),

            #[cfg(feature = "debug")]
            debug_events: alloc::vec::Vec::new(),
        }
    }

    // --- Queries ---

    /// Current self-flow state.
    pub fn state(&self) -> DuaState {
        self.dua_state
    }

    /// The node's Domain Unicast Address, if one exists.
    pub fn domain_unicast_address(&self) -> Option<Ip6Address> {
        self.dua
    }

    /// Current duplicate-detection counter.
    pub fn dad_counter(&self) -> u8 {
        self.dad_counter
    }

    /// Whether the shared timer is currently scheduled.
    pub fn timer_armed(&self) -> bool {
        self.timer_at.is_some()
    }

    /// Children whose DUA still needs (de-)registration.
    pub fn child_pending_mask(&self) -> &ChildMask {
        &self.child_pending
    }

    /// Children whose DUA this node has registered on their behalf.
    pub fn child_registered_mask(&self) -> &ChildMask {
        &self.child_registered
    }

    /// The child slot currently in flight, if any.
    pub fn registering_child(&self) -> Option<ChildIndex> {
        self.child_registering
    }

    /// Registration traffic counters.
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Channel for topology updates from the host.
    pub fn updates(&self) -> &UpdateChannel {
        &self.updates
    }

    /// Channel of events for the host to act on.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Get the transport reference.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the current timestamp from the clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // --- Run loop ---

    /// Run the manager's main loop.
    ///
    /// Fully event-driven; runs forever. Handles exchange outcomes and
    /// notices from the transport, topology updates, and timer expiry.
    /// Call this from an async task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        loop {
            // No countdown armed: idle wake at a coarse period.
            let deadline = match self.timer_at {
                Some(t) => t,
                None => self.clock.now() + Duration::from_secs(60),
            };

            let result = select3(
                self.transport.incoming().receive(),
                self.updates.receive(),
                self.clock.sleep_until(deadline),
            )
            .await;

            match result {
                Either3::First(rx) => {
                    let now = self.clock.now();
                    self.handle_backbone_rx(rx, now);
                }
                Either3::Second(update) => {
                    let now = self.clock.now();
                    self.handle_topology_update(update, now);
                }
                Either3::Third(()) => {
                    let now = self.clock.now();
                    if self.timer_at.is_some_and(|t| now >= t) {
                        self.handle_timer(now);
                    }
                }
            }
        }
    }

    /// Dispatch a topology update to the owning flow.
    pub fn handle_topology_update(&mut self, update: TopologyUpdate, now: Timestamp) {
        match update {
            TopologyUpdate::DomainPrefix(update) => {
                self.handle_domain_prefix_update(update, now);
            }
            TopologyUpdate::BackbonePrimary(update) => {
                self.handle_backbone_primary_update(update, now);
            }
            TopologyUpdate::ChildDua {
                child_index,
                event,
                dua,
                ml_iid,
            } => {
                self.update_child_dua(child_index, event, dua, ml_iid, now);
            }
            TopologyUpdate::Mesh(event) => {
                self.handle_mesh_event(event, now);
            }
        }
    }

    // --- Shared timer ---

    /// Handle expiry of the shared timer.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.timer_at = None;
        let elapsed = now.saturating_since(self.last_tick).as_secs();
        self.last_tick = now;

        let expired = self.delays.advance(elapsed);

        if expired.reregistration && self.dua_state == DuaState::Registered {
            self.set_dua_state(DuaState::ToRegister);
        }
        if expired.registration || expired.reregistration || expired.check {
            self.perform_next_registration(now);
        }
        self.reschedule_timer(now);
    }

    /// Re-establish "timer scheduled iff any countdown armed".
    ///
    /// Must be called after every handler that can mutate a delay field;
    /// topology events can arm a field between ticks.
    pub(crate) fn reschedule_timer(&mut self, now: Timestamp) {
        if self.delays.any_armed() {
            if self.timer_at.is_none() {
                self.last_tick = now;
                self.timer_at = Some(now + Duration::from_millis(STATE_UPDATE_PERIOD_MS));
            }
        } else {
            self.timer_at = None;
        }
        debug_assert_eq!(self.delays.any_armed(), self.timer_at.is_some());
        emit_debug!(
            self,
            DebugEvent::TimerRescheduled {
                armed: self.timer_at.is_some(),
            }
        );
    }

    // --- Registration protocol engine ---

    /// Attempt whatever registration work is currently unblocked, in both
    /// flows.
    pub fn perform_next_registration(&mut self, now: Timestamp) {
        self.maybe_expire_registration(now);
        self.perform_self_registration(now);
        self.perform_next_child_registration(now);
        self.reschedule_timer(now);
    }

    /// Encode a request and hand it to the transport.
    ///
    /// Returns false if the transport queue rejected it; callers fall back
    /// to their retry path.
    pub(crate) fn send_registration_request(
        &mut self,
        op: RegistrationOp,
        target: Ip6Address,
        ml_iid: InterfaceIdentifier,
        last_transaction_secs: u32,
    ) -> bool {
        let request = RegistrationRequest {
            op,
            target,
            ml_iid,
            last_transaction_secs,
        };
        let queued = self
            .transport
            .outgoing()
            .try_send(TxRequest {
                target,
                data: request.encode_to_vec(),
            })
            .is_ok();
        if queued {
            self.counters.requests_sent += 1;
            emit_debug!(self, DebugEvent::RequestQueued { target, op });
        }
        queued
    }

    /// Handle inbound transport traffic.
    pub fn handle_backbone_rx(&mut self, rx: BackboneRx, now: Timestamp) {
        match rx {
            BackboneRx::Exchange {
                target,
                disposition,
                payload,
            } => {
                // A response that fails to decode, or whose echoed target
                // disagrees with the exchange tag, counts as a failure of
                // the exchange rather than being applied.
                let status = match disposition {
                    Disposition::Ok => match Message::decode_from_slice(&payload) {
                        Ok(Message::Response(rsp)) if rsp.target == target => Some(rsp.status),
                        _ => None,
                    },
                    Disposition::Timeout | Disposition::Failure => None,
                };
                self.dispatch_exchange_outcome(target, status, now);
            }
            BackboneRx::Unsolicited { payload } => {
                if let Ok(Message::Notice(notice)) = Message::decode_from_slice(&payload) {
                    self.handle_registration_notice(notice, now);
                }
            }
        }
    }

    /// Route an exchange outcome to the flow still expecting it, if any.
    ///
    /// A flow that has been reset since the request went out (prefix
    /// withdrawn, child removed) no longer matches; the outcome is counted
    /// and discarded rather than applied to stale state.
    fn dispatch_exchange_outcome(
        &mut self,
        target: Ip6Address,
        status: Option<RegistrationStatus>,
        now: Timestamp,
    ) {
        if self.dua_state == DuaState::Registering && self.dua == Some(target) {
            self.counters.responses_applied += 1;
            emit_debug!(self, DebugEvent::OutcomeApplied { target, status });
            self.handle_self_outcome(status, now);
            return;
        }

        if let Some(index) = self.child_registering {
            // A mid-flight child change (register_current_child) leaves the
            // record naming a newer address than the in-flight request; the
            // outcome still belongs to the in-flight slot.
            let matches = self.children.get(index).map(|entry| entry.dua) == Some(target)
                || self.register_current_child;
            if matches {
                self.counters.responses_applied += 1;
                emit_debug!(self, DebugEvent::OutcomeApplied { target, status });
                self.handle_child_outcome(index, status, now);
                return;
            }
        }

        self.counters.responses_stale += 1;
        emit_debug!(self, DebugEvent::OutcomeStale { target });
    }

    /// Handle an unsolicited notice from the backbone side.
    ///
    /// A valid notice forces the owning DUA back to its needs-registration
    /// state immediately, bypassing any armed delay.
    pub(crate) fn handle_registration_notice(
        &mut self,
        notice: RegistrationNotice,
        now: Timestamp,
    ) {
        let target = notice.target;

        if self.dua == Some(target)
            && matches!(self.dua_state, DuaState::Registered | DuaState::Registering)
        {
            self.counters.notices += 1;
            emit_debug!(
                self,
                DebugEvent::NoticeReceived {
                    target,
                    status: notice.status,
                }
            );
            self.set_dua_state(DuaState::ToRegister);
            self.delays.clear_registration();
            self.perform_next_registration(now);
            return;
        }

        if let Some(index) = self.find_registered_child_by_dua(&target) {
            self.counters.notices += 1;
            emit_debug!(
                self,
                DebugEvent::NoticeReceived {
                    target,
                    status: notice.status,
                }
            );
            self.child_registered.clear(index);
            self.child_pending.set(index);
            if let Some(entry) = self.children.get_mut(index) {
                entry.op = RegistrationOp::Register;
            }
            self.delays.clear_check();
            self.perform_next_registration(now);
        }
    }

    // --- Internal helpers shared by the flow modules ---

    pub(crate) fn bump_counter_duplicates(&mut self) {
        self.counters.duplicates += 1;
    }

    pub(crate) fn bump_counter_failures(&mut self) {
        self.counters.failures += 1;
    }

    /// Set the self-flow state, maintaining state-scoped countdowns.
    pub(crate) fn set_dua_state(&mut self, state: DuaState) {
        if self.dua_state == state {
            return;
        }
        // Leaving Registered invalidates the re-registration cadence.
        if self.dua_state == DuaState::Registered {
            self.delays.clear_reregistration();
        }
        emit_debug!(
            self,
            DebugEvent::StateChanged {
                from: self.dua_state,
                to: state,
            }
        );
        self.dua_state = state;
    }

    /// Push an event to the host event channel.
    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    #[cfg(feature = "debug")]
    pub(crate) fn emit_debug_event(&mut self, event: DebugEvent) {
        self.debug_events.push(event);
    }

    /// Take all buffered debug events (for harness inspection).
    #[cfg(feature = "debug")]
    pub fn take_debug_events(&mut self) -> alloc::vec::Vec<DebugEvent> {
        core::mem::take(&mut self.debug_events)
    }
}
