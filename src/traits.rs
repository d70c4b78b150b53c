//! Collaborator traits for transport, time, randomness, and persistence.
//!
//! These traits let the manager run against different:
//! - Backbone transports (CoAP over the mesh backbone link, simulation)
//! - Time sources (hardware timers, simulated time)
//! - Entropy sources (hardware RNG, deterministic test generators)
//! - Settings stores (flash, RAM, simulation)
//!
//! Each component receives exactly the handles it needs at construction; the
//! core performs no ambient lookup.

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Disposition, Event, Ip6Address, TopologyUpdate};

/// Queue size for transport channels.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 4;

/// Queue size for the topology-update channel.
pub(crate) const UPDATE_QUEUE_SIZE: usize = 8;

/// Queue size for the host event channel.
pub(crate) const EVENT_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// An encoded registration request queued for the transport.
///
/// `target` duplicates the request's target address so the transport can tag
/// the eventual outcome without decoding the payload.
#[derive(Debug, Clone)]
pub struct TxRequest {
    /// Address the request is about (correlation tag).
    pub target: Ip6Address,
    /// Encoded request message.
    pub data: Vec<u8>,
}

/// Inbound traffic from the backbone side.
#[derive(Debug, Clone)]
pub enum BackboneRx {
    /// Outcome of a request/response exchange.
    ///
    /// `target` echoes the [`TxRequest::target`] of the completed request.
    /// `payload` holds the encoded response when `disposition` is
    /// [`Disposition::Ok`], and is empty otherwise.
    Exchange {
        target: Ip6Address,
        disposition: Disposition,
        payload: Vec<u8>,
    },
    /// Unsolicited notification (no request of ours triggered it).
    Unsolicited { payload: Vec<u8> },
}

/// Outgoing request channel type.
pub type BackboneTxChannel = Channel<ChannelMutex, TxRequest, TRANSPORT_QUEUE_SIZE>;

/// Incoming exchange/notification channel type.
pub type BackboneRxChannel = Channel<ChannelMutex, BackboneRx, TRANSPORT_QUEUE_SIZE>;

/// Topology-update channel type.
pub type UpdateChannel = Channel<ChannelMutex, TopologyUpdate, UPDATE_QUEUE_SIZE>;

/// Host event channel type.
pub type EventChannel = Channel<ChannelMutex, Event, EVENT_QUEUE_SIZE>;

/// Transport to the primary Backbone Router.
///
/// The transport owns message framing, retransmission, and request/response
/// matching. The manager enqueues at most one request per flow and the
/// transport eventually delivers exactly one [`BackboneRx::Exchange`] per
/// request, tagged with the request's target.
pub trait BackboneTransport {
    /// Queue of encoded requests awaiting transmission.
    fn outgoing(&self) -> &BackboneTxChannel;

    /// Channel of exchange outcomes and unsolicited notifications.
    ///
    /// - Transport task calls `incoming().try_send(rx)` on completion
    /// - Simulator injects outcomes the same way
    /// - The manager calls `incoming().receive().await` in its run loop
    fn incoming(&self) -> &BackboneRxChannel;
}

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```ignore
/// use duanode::traits::test_impls::MockClock;
/// use duanode::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = impl Future<Output = ()>;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait.
///
/// Used for:
/// - Interface identifier seeding
/// - Re-registration jitter
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;

    /// Generate a random u64.
    fn gen_u64(&mut self) -> u64 {
        let hi = self.gen_range(0, 1 << 32);
        let lo = self.gen_range(0, 1 << 32);
        (hi << 32) | lo
    }
}

/// Non-volatile settings store.
///
/// Only the generated interface identifier and the duplicate-detection
/// counter pass through here. A missing value is not an error; it just
/// triggers fresh generation.
pub trait Store {
    /// Persist `value` under `key`, replacing any prior value.
    fn save(&mut self, key: u16, value: &[u8]);

    /// Load the value stored under `key`, if any.
    fn load(&self, key: u16) -> Option<Vec<u8>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature
    //! enabled.

    use core::cell::Cell;
    use core::future::{ready, Ready};

    use hashbrown::HashMap;

    use super::*;
    use crate::time::Duration;
    use crate::wire::{RegistrationNotice, RegistrationResponse};

    /// Mock backbone transport backed by the real channel types.
    pub struct MockTransport {
        outgoing: BackboneTxChannel,
        incoming: BackboneRxChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                outgoing: BackboneTxChannel::new(),
                incoming: BackboneRxChannel::new(),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Deliver an exchange outcome as if the transport completed a
        /// request.
        pub fn inject_exchange(
            &self,
            target: Ip6Address,
            disposition: Disposition,
            payload: Vec<u8>,
        ) {
            let _ = self.incoming.try_send(BackboneRx::Exchange {
                target,
                disposition,
                payload,
            });
        }

        /// Deliver a successful response to `target`.
        pub fn inject_response(&self, response: RegistrationResponse) {
            self.inject_exchange(
                response.target,
                Disposition::Ok,
                response.encode_to_vec(),
            );
        }

        /// Deliver an unsolicited notice.
        pub fn inject_notice(&self, notice: RegistrationNotice) {
            let _ = self.incoming.try_send(BackboneRx::Unsolicited {
                payload: notice.encode_to_vec(),
            });
        }

        /// Take all queued requests (for assertions).
        pub fn take_sent(&self) -> Vec<TxRequest> {
            let mut sent = Vec::new();
            while let Ok(req) = self.outgoing.try_receive() {
                sent.push(req);
            }
            sent
        }
    }

    impl BackboneTransport for MockTransport {
        fn outgoing(&self) -> &BackboneTxChannel {
            &self.outgoing
        }

        fn incoming(&self) -> &BackboneRxChannel {
            &self.incoming
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Jump to a specific time.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // In synchronous tests, sleep completes immediately; the test
            // advances time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 987_654_321 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max - min;
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }

    /// In-memory settings store.
    #[derive(Default)]
    pub struct MemoryStore {
        entries: HashMap<u16, Vec<u8>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Store for MemoryStore {
        fn save(&mut self, key: u16, value: &[u8]) {
            self.entries.insert(key, value.to_vec());
        }

        fn load(&self, key: u16) -> Option<Vec<u8>> {
            self.entries.get(&key).cloned()
        }
    }
}
