//! Self-flow: the node's own Domain Unicast Address.
//!
//! This module handles:
//! - Domain prefix and primary Backbone Router updates
//! - Interface identifier generation and duplicate-collision handling
//! - Registration submission, outcome handling, and retry scheduling
//! - Persistence of the identifier base and duplicate-detection counter
//!
//! State lifecycle: NotExist -> ToRegister -> Registering -> Registered,
//! with transitions back to ToRegister on duplicates, failures,
//! re-registration expiry, and topology changes, and back to NotExist only
//! when the domain prefix disappears.

use crate::manager::DuaManager;
use crate::time::Timestamp;
use crate::traits::{BackboneTransport, Clock, Random, Store};
use crate::types::{
    is_reserved_iid, BackbonePrimaryUpdate, DomainPrefixUpdate, DuaState, Error, Event,
    InterfaceIdentifier, RegistrationOp, RegistrationStatus, KEY_DUA_IDENTIFIER,
};

#[cfg(feature = "debug")]
use crate::debug::DebugEvent;

/// Deterministic identifier perturbation (splitmix64 finalizer).
///
/// Distinct counters map to distinct identifiers for a fixed base, so a
/// rejected value is never produced again within the counter's range.
fn perturb_iid(base: u64, counter: u8) -> InterfaceIdentifier {
    let mut z = base ^ (counter as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    z.to_be_bytes()
}

impl<T, R, Clk, S> DuaManager<T, R, Clk, S>
where
    T: BackboneTransport,
    R: Random,
    Clk: Clock,
    S: Store,
{
    // --- Topology reactions ---

    /// Handle a domain prefix availability change.
    pub fn handle_domain_prefix_update(&mut self, update: DomainPrefixUpdate, now: Timestamp) {
        match update {
            DomainPrefixUpdate::Removed => {
                self.domain_prefix = None;
                self.remove_domain_unicast_address();
                self.delays.clear_registration();
                // Children's DUAs were formed from the withdrawn prefix;
                // they re-announce once a new prefix appears.
                self.clear_proxy_state();
                self.reschedule_timer(now);
            }
            DomainPrefixUpdate::Added(prefix) | DomainPrefixUpdate::Refreshed(prefix) => {
                if self.domain_prefix == Some(prefix) && self.dua_state != DuaState::NotExist {
                    return;
                }
                if self.dua_state != DuaState::NotExist {
                    // Superseded prefix: the old address goes away first.
                    self.remove_domain_unicast_address();
                }
                self.domain_prefix = Some(prefix);
                self.generate_domain_unicast_address();
                self.perform_next_registration(now);
            }
        }
    }

    /// Handle a primary Backbone Router change.
    pub fn handle_backbone_primary_update(&mut self, update: BackbonePrimaryUpdate, now: Timestamp) {
        match update {
            BackbonePrimaryUpdate::Added(config) => {
                self.primary = Some(config);
                // Existing registrations were held by the previous primary.
                if matches!(self.dua_state, DuaState::Registered | DuaState::Registering) {
                    self.set_dua_state(DuaState::ToRegister);
                }
                if self.dua_state == DuaState::ToRegister {
                    // Give the new primary's mesh links time to establish.
                    self.delays.arm_registration(self.config.new_primary_delay);
                }
                self.requeue_registered_children();
                if !self.child_pending.is_empty() {
                    self.delays.arm_check(self.config.check_delay);
                }
                self.reschedule_timer(now);
            }
            BackbonePrimaryUpdate::Changed(config) => {
                let sequence_bumped = self
                    .primary
                    .map_or(true, |prev| prev.sequence_number != config.sequence_number);
                self.primary = Some(config);
                if sequence_bumped {
                    // Same primary lost its registration state: redo now.
                    if matches!(self.dua_state, DuaState::Registered | DuaState::Registering) {
                        self.set_dua_state(DuaState::ToRegister);
                    }
                    self.delays.clear_registration();
                    self.requeue_registered_children();
                    self.delays.clear_check();
                    self.perform_next_registration(now);
                } else {
                    self.reschedule_timer(now);
                }
            }
            BackbonePrimaryUpdate::Removed => {
                self.primary = None;
                // Nothing to talk to; in-flight interest is cancelled and
                // late outcomes will be dropped as stale.
                if self.dua_state == DuaState::Registering {
                    self.set_dua_state(DuaState::ToRegister);
                }
                self.child_registering = None;
                self.register_current_child = false;
                self.reschedule_timer(now);
            }
        }
    }

    /// Handle a mesh connectivity change.
    pub fn handle_mesh_event(&mut self, event: crate::types::MeshEvent, now: Timestamp) {
        match event {
            crate::types::MeshEvent::Detached => {
                self.attached = false;
                if self.dua_state == DuaState::Registering {
                    self.set_dua_state(DuaState::ToRegister);
                }
                self.child_registering = None;
                self.register_current_child = false;
            }
            crate::types::MeshEvent::Attached => {
                self.attached = true;
                self.perform_next_registration(now);
            }
        }
        self.reschedule_timer(now);
    }

    // --- Fixed identifier API ---

    /// Set the interface identifier manually specified for the Domain
    /// Unicast Address.
    ///
    /// Returns [`Error::InvalidArgument`] without any state change if the
    /// identifier is reserved.
    pub fn set_fixed_dua_interface_identifier(
        &mut self,
        iid: InterfaceIdentifier,
        now: Timestamp,
    ) -> Result<(), Error> {
        if is_reserved_iid(&iid) {
            return Err(Error::InvalidArgument);
        }
        if self.fixed_iid == Some(iid) {
            return Ok(());
        }
        self.fixed_iid = Some(iid);
        self.regenerate_if_present(now);
        Ok(())
    }

    /// Clear the manually specified interface identifier.
    pub fn clear_fixed_dua_interface_identifier(&mut self, now: Timestamp) {
        if self.fixed_iid.take().is_some() {
            self.regenerate_if_present(now);
        }
    }

    /// Whether a fixed interface identifier is set.
    pub fn is_fixed_dua_interface_identifier_set(&self) -> bool {
        self.fixed_iid.is_some()
    }

    /// The fixed interface identifier, if set.
    pub fn fixed_dua_interface_identifier(&self) -> Option<InterfaceIdentifier> {
        self.fixed_iid
    }

    fn regenerate_if_present(&mut self, now: Timestamp) {
        if self.domain_prefix.is_some() && self.dua_state != DuaState::NotExist {
            self.remove_domain_unicast_address();
            self.generate_domain_unicast_address();
            self.perform_next_registration(now);
        }
    }

    // --- Persistence ---

    /// Restore the identifier base and duplicate-detection counter from the
    /// settings store. Call once at startup, before the first prefix update.
    pub fn restore(&mut self) {
        let Some(bytes) = self.store.load(KEY_DUA_IDENTIFIER) else {
            return;
        };
        if bytes.len() != 9 {
            return;
        }
        let mut base = [0u8; 8];
        base.copy_from_slice(&bytes[..8]);
        self.iid_base = Some(base);
        self.dad_counter = bytes[8];
    }

    /// Write the identifier base and counter through the settings store.
    ///
    /// The fixed override, when set, is never persisted.
    pub(crate) fn store_settings(&mut self) {
        if self.fixed_iid.is_some() {
            return;
        }
        let Some(base) = self.iid_base else {
            return;
        };
        let mut bytes = [0u8; 9];
        bytes[..8].copy_from_slice(&base);
        bytes[8] = self.dad_counter;
        self.store.save(KEY_DUA_IDENTIFIER, &bytes);
    }

    // --- Generation ---

    /// Produce the candidate interface identifier for the current counter.
    ///
    /// Deterministic for a given (base, counter): retransmitted topology
    /// events regenerate the same candidate.
    pub(crate) fn generate_iid(&mut self) -> InterfaceIdentifier {
        if let Some(fixed) = self.fixed_iid {
            return fixed;
        }

        let base = match self.iid_base {
            Some(base) => base,
            None => {
                let base = self.random.gen_u64().to_be_bytes();
                self.iid_base = Some(base);
                base
            }
        };

        // A reserved candidate is treated like a collision. The reserved
        // space is vanishingly small, so the loop bound is never reached in
        // practice.
        let base = u64::from_be_bytes(base);
        for _ in 0..=u8::MAX as usize {
            let candidate = perturb_iid(base, self.dad_counter);
            if !is_reserved_iid(&candidate) {
                emit_debug!(
                    self,
                    DebugEvent::IdentifierGenerated {
                        iid: candidate,
                        dad_counter: self.dad_counter,
                    }
                );
                return candidate;
            }
            self.dad_counter = self.dad_counter.wrapping_add(1);
        }
        perturb_iid(base, self.dad_counter)
    }

    /// Build the candidate address from the current prefix and identifier.
    pub(crate) fn generate_domain_unicast_address(&mut self) {
        let Some(prefix) = self.domain_prefix else {
            return;
        };
        let iid = self.generate_iid();
        self.dua = Some(prefix.address_with_iid(&iid));
        self.set_dua_state(DuaState::ToRegister);
    }

    // --- Registration ---

    /// Submit the self-flow registration if it is unblocked.
    pub(crate) fn perform_self_registration(&mut self, now: Timestamp) {
        if self.dua_state != DuaState::ToRegister
            || self.delays.registration() != 0
            || !self.attached
            || self.primary.is_none()
        {
            return;
        }
        let Some(dua) = self.dua else {
            return;
        };

        let last_transaction = self
            .last_registration_time
            .map(|t| now.saturating_since(t).as_secs().min(u32::MAX as u64) as u32)
            .unwrap_or(0);

        if self.send_registration_request(
            RegistrationOp::Register,
            dua,
            self.ml_iid,
            last_transaction,
        ) {
            self.set_dua_state(DuaState::Registering);
            self.last_registration_time = Some(now);
        } else {
            // Transport queue full; same path as a transport failure.
            self.delays
                .arm_registration(self.config.retry_delay(self.failed_attempts.max(1)));
        }
    }

    /// Apply a self-flow exchange outcome.
    ///
    /// `status` is None for transport-level timeouts and failures.
    pub(crate) fn handle_self_outcome(
        &mut self,
        status: Option<RegistrationStatus>,
        now: Timestamp,
    ) {
        self.last_registration_time = Some(now);

        match status {
            Some(RegistrationStatus::Success) => {
                self.set_dua_state(DuaState::Registered);
                self.failed_attempts = 0;
                self.add_domain_unicast_address();
                self.store_settings();
                self.arm_reregistration();
            }
            Some(RegistrationStatus::Duplicate) => {
                self.bump_counter_duplicates();
                self.dad_counter = self.dad_counter.wrapping_add(1);
                self.generate_domain_unicast_address();
                self.store_settings();
                self.delays.arm_registration(self.config.retry_delay(1));
            }
            Some(RegistrationStatus::ReRegister) => {
                self.set_dua_state(DuaState::ToRegister);
                self.perform_next_registration(now);
            }
            _ => {
                self.bump_counter_failures();
                self.failed_attempts = self.failed_attempts.saturating_add(1);
                self.set_dua_state(DuaState::ToRegister);
                self.delays
                    .arm_registration(self.config.retry_delay(self.failed_attempts));
            }
        }
        self.reschedule_timer(now);
    }

    /// Arm the periodic re-registration countdown with jitter.
    pub(crate) fn arm_reregistration(&mut self) {
        let delay = self
            .primary
            .map(|p| p.reregistration_delay)
            .filter(|d| *d != 0)
            .unwrap_or(self.config.default_reregistration_delay) as u64;

        // Jitter within [7/8 * delay, delay].
        let lo = (delay * 7 / 8).max(1);
        let jittered = if delay > lo {
            self.random.gen_range(lo, delay + 1)
        } else {
            delay
        };
        self.delays.clear_reregistration();
        self.delays.arm_reregistration(jittered as u16);
    }

    /// Fall back to ToRegister if the re-registration interval elapsed.
    ///
    /// Lets opportunistic evaluation catch an elapsed cadence without a
    /// dedicated timer firing.
    pub(crate) fn maybe_expire_registration(&mut self, now: Timestamp) {
        if self.dua_state != DuaState::Registered {
            return;
        }
        let Some(last) = self.last_registration_time else {
            return;
        };
        let interval = self
            .primary
            .map(|p| p.reregistration_delay)
            .filter(|d| *d != 0)
            .unwrap_or(self.config.default_reregistration_delay);
        if now.saturating_since(last).as_secs() >= interval as u64 {
            self.set_dua_state(DuaState::ToRegister);
        }
    }

    // --- Interface side effects ---

    /// Surface the registered address to the host interface, once.
    pub(crate) fn add_domain_unicast_address(&mut self) {
        if self.address_added {
            return;
        }
        if let Some(dua) = self.dua {
            self.push_event(Event::AddressAdded(dua));
            self.address_added = true;
        }
    }

    /// Remove the address from the host interface and reset the flow.
    ///
    /// Persisted state is deliberately untouched: the next acquisition
    /// restores the same identifier.
    pub(crate) fn remove_domain_unicast_address(&mut self) {
        if self.address_added {
            if let Some(dua) = self.dua {
                self.push_event(Event::AddressRemoved(dua));
            }
            self.address_added = false;
        }
        self.dua = None;
        self.failed_attempts = 0;
        self.set_dua_state(DuaState::NotExist);
    }
}
