//! Timing policy configuration.
//!
//! Capacity bounds are compile-time constants in [`crate::types`]; everything
//! here is runtime policy a platform may want to tune without rebuilding.

use crate::types::{
    DEFAULT_CHECK_DELAY, DEFAULT_REGISTRATION_RETRY_DELAY, DEFAULT_REREGISTRATION_DELAY,
    MAX_REGISTRATION_RETRY_DELAY, NEW_PRIMARY_REGISTRATION_DELAY,
};

/// Growth policy for the self-flow registration retry delay.
///
/// The protocol does not mandate a curve beyond "bounded"; both variants
/// keep the retry rate bounded under sustained backbone unreachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Every retry waits the base delay.
    Fixed,
    /// Delay doubles per consecutive failure, capped at the configured max.
    Doubling,
}

/// Timing policy for registration scheduling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DuaConfig {
    /// Base delay (seconds) before retrying a failed self registration.
    pub registration_retry_delay: u8,
    /// Cap (seconds) for [`BackoffPolicy::Doubling`].
    pub max_registration_retry_delay: u8,
    /// Retry delay growth policy.
    pub backoff: BackoffPolicy,
    /// Delay (seconds) before registering with a newly-elected primary,
    /// allowing its mesh links to establish.
    pub new_primary_delay: u8,
    /// Minimum interval (seconds) between proxy scheduling passes.
    pub check_delay: u8,
    /// Re-registration cadence (seconds) when the primary advertises none.
    pub default_reregistration_delay: u16,
}

impl Default for DuaConfig {
    fn default() -> Self {
        Self {
            registration_retry_delay: DEFAULT_REGISTRATION_RETRY_DELAY,
            max_registration_retry_delay: MAX_REGISTRATION_RETRY_DELAY,
            backoff: BackoffPolicy::Fixed,
            new_primary_delay: NEW_PRIMARY_REGISTRATION_DELAY,
            check_delay: DEFAULT_CHECK_DELAY,
            default_reregistration_delay: DEFAULT_REREGISTRATION_DELAY,
        }
    }
}

impl DuaConfig {
    /// Retry delay for the given consecutive-failure count.
    ///
    /// `attempts` counts failures since the last success; the first retry
    /// uses the base delay under either policy.
    pub fn retry_delay(&self, attempts: u8) -> u8 {
        match self.backoff {
            BackoffPolicy::Fixed => self.registration_retry_delay,
            BackoffPolicy::Doubling => {
                let shift = attempts.saturating_sub(1).min(7) as u32;
                let delay = (self.registration_retry_delay as u32) << shift;
                delay.min(self.max_registration_retry_delay as u32) as u8
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_flat() {
        let config = DuaConfig::default();
        assert_eq!(config.retry_delay(1), config.registration_retry_delay);
        assert_eq!(config.retry_delay(9), config.registration_retry_delay);
    }

    #[test]
    fn test_doubling_backoff_is_capped() {
        let config = DuaConfig {
            backoff: BackoffPolicy::Doubling,
            registration_retry_delay: 5,
            max_registration_retry_delay: 40,
            ..DuaConfig::default()
        };
        assert_eq!(config.retry_delay(1), 5);
        assert_eq!(config.retry_delay(2), 10);
        assert_eq!(config.retry_delay(3), 20);
        assert_eq!(config.retry_delay(4), 40);
        assert_eq!(config.retry_delay(5), 40);
        assert_eq!(config.retry_delay(100), 40);
    }
}
