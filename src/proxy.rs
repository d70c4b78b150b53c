//! Proxy flow: registering DUAs on behalf of children.
//!
//! A parent registers addresses for children that cannot reach the backbone
//! themselves. The scheduler serializes the work through one in-flight slot:
//! it scans the pending mask round-robin from just after the last-serviced
//! slot, submits one request, and resumes scanning when the outcome arrives.
//!
//! Failures carry no per-child backoff; the slot stays pending and the
//! shared check delay throttles how often scan passes run.

use crate::children::ChildDua;
use crate::manager::DuaManager;
use crate::time::Timestamp;
use crate::traits::{BackboneTransport, Clock, Random, Store};
use crate::types::{
    ChildDuaEvent, ChildIndex, Event, InterfaceIdentifier, Ip6Address, RegistrationOp,
    RegistrationStatus, MAX_PROXY_CHILDREN,
};

#[cfg(feature = "debug")]
use crate::debug::DebugEvent;

impl<T, R, Clk, S> DuaManager<T, R, Clk, S>
where
    T: BackboneTransport,
    R: Random,
    Clk: Clock,
    S: Store,
{
    /// Apply a per-child DUA state change from the mesh topology.
    ///
    /// Slot indices are stable for the lifetime of the child's attachment.
    pub fn update_child_dua(
        &mut self,
        child_index: ChildIndex,
        event: ChildDuaEvent,
        dua: Ip6Address,
        ml_iid: InterfaceIdentifier,
        now: Timestamp,
    ) {
        if child_index as usize >= MAX_PROXY_CHILDREN {
            return;
        }

        match event {
            ChildDuaEvent::Added | ChildDuaEvent::Changed => {
                self.children.insert(
                    child_index,
                    ChildDua {
                        dua,
                        ml_iid,
                        op: RegistrationOp::Register,
                    },
                );
                self.child_pending.set(child_index);
                // Any prior registration named a stale address.
                self.child_registered.clear(child_index);
                if self.child_registering == Some(child_index) {
                    self.register_current_child = true;
                }
            }
            ChildDuaEvent::Removed => {
                if self.child_registered.get(child_index) {
                    // The backbone still holds the registration; release it
                    // before forgetting the slot.
                    if let Some(entry) = self.children.get_mut(child_index) {
                        entry.op = RegistrationOp::Release;
                    }
                    self.child_registered.clear(child_index);
                    self.child_pending.set(child_index);
                } else {
                    // Never registered: the flow's interest is cancelled and
                    // a late outcome will be dropped as stale.
                    self.child_pending.clear(child_index);
                    self.children.remove(child_index);
                    if self.child_registering == Some(child_index) {
                        self.child_registering = None;
                        self.register_current_child = false;
                    }
                }
            }
        }

        self.delays.arm_check(self.config.check_delay);
        self.reschedule_timer(now);
    }

    /// Submit the next pending child registration if the flow is idle.
    pub(crate) fn perform_next_child_registration(&mut self, _now: Timestamp) {
        if self.child_registering.is_some()
            || self.delays.check() != 0
            || !self.attached
            || self.primary.is_none()
        {
            return;
        }

        let Some(index) = self.child_pending.next_set_after(self.last_serviced_child) else {
            return;
        };
        let Some(entry) = self.children.get(index).copied() else {
            // Bit without a record; unreachable via the public surface.
            self.child_pending.clear(index);
            return;
        };

        emit_debug!(self, DebugEvent::ChildPicked { child_index: index });

        if self.send_registration_request(entry.op, entry.dua, entry.ml_iid, 0) {
            self.child_registering = Some(index);
            self.last_serviced_child = index;
        } else {
            self.delays.arm_check(self.config.check_delay);
        }
    }

    /// Apply an exchange outcome for the in-flight child slot.
    ///
    /// `status` is None for transport-level timeouts and failures.
    pub(crate) fn handle_child_outcome(
        &mut self,
        index: ChildIndex,
        status: Option<RegistrationStatus>,
        now: Timestamp,
    ) {
        self.child_registering = None;

        if core::mem::take(&mut self.register_current_child) {
            // The child changed while this registration was in flight, so
            // the outcome names a stale address. Leave the slot pending and
            // restart the scan at the same slot before advancing.
            self.last_serviced_child =
                ((index as usize + MAX_PROXY_CHILDREN - 1) % MAX_PROXY_CHILDREN) as ChildIndex;
            self.delays.clear_check();
            self.perform_next_child_registration(now);
            self.reschedule_timer(now);
            return;
        }

        let op = self.children.get(index).map(|entry| entry.op);

        match status {
            Some(RegistrationStatus::Success) => {
                match op {
                    Some(RegistrationOp::Register) => {
                        self.child_pending.clear(index);
                        self.child_registered.set(index);
                    }
                    Some(RegistrationOp::Release) => {
                        self.child_pending.clear(index);
                        self.children.remove(index);
                    }
                    None => {}
                }
                self.push_event(Event::ChildDuaRegistered {
                    child_index: index,
                    status: RegistrationStatus::Success,
                });
            }
            Some(status) => {
                if status == RegistrationStatus::Duplicate {
                    self.bump_counter_duplicates();
                } else {
                    self.bump_counter_failures();
                }
                // Slot stays pending; the check delay throttles the retry.
                self.delays.arm_check(self.config.check_delay);
                self.push_event(Event::ChildDuaRegistered {
                    child_index: index,
                    status,
                });
            }
            None => {
                self.bump_counter_failures();
                self.delays.arm_check(self.config.check_delay);
                self.push_event(Event::ChildDuaRegistered {
                    child_index: index,
                    status: RegistrationStatus::GeneralFailure,
                });
            }
        }

        self.perform_next_child_registration(now);
        self.reschedule_timer(now);
    }

    /// Move every registered child back to pending (primary changed).
    pub(crate) fn requeue_registered_children(&mut self) {
        let registered = self.child_registered;
        for index in registered.iter() {
            self.child_pending.set(index);
            if let Some(entry) = self.children.get_mut(index) {
                entry.op = RegistrationOp::Register;
            }
        }
        self.child_registered = crate::children::ChildMask::new();
    }

    /// Drop all proxy state (domain prefix withdrawn).
    pub(crate) fn clear_proxy_state(&mut self) {
        self.children.clear();
        self.child_pending = crate::children::ChildMask::new();
        self.child_registered = crate::children::ChildMask::new();
        self.child_registering = None;
        self.register_current_child = false;
        self.delays.clear_check();
    }

    /// Registered child slot owning `target`, if any.
    pub(crate) fn find_registered_child_by_dua(&self, target: &Ip6Address) -> Option<ChildIndex> {
        self.child_registered
            .iter()
            .find(|index| self.children.get(*index).map(|entry| entry.dua) == Some(*target))
    }
}
