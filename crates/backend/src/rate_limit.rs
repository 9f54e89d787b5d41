//! Hosted-API rate-limit bookkeeping.
//!
//! One record per API client, updated after every response from the
//! `x-ratelimit-*` headers and consulted before every request.

use revline_core::ServiceError;

pub const DEFAULT_REMAINING: i64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: i64,
    /// Unix seconds at which the quota resets.
    pub reset_at: i64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            remaining: DEFAULT_REMAINING,
            reset_at: 0,
        }
    }
}

impl RateLimit {
    /// Fail fast when the quota is exhausted and the window has not reset.
    pub fn check(&self, now: i64) -> Result<(), ServiceError> {
        if self.remaining == 0 && self.reset_at > now {
            return Err(ServiceError::RateLimited {
                reset_at: self.reset_at,
            });
        }
        Ok(())
    }

    /// Apply `x-ratelimit-remaining` / `x-ratelimit-reset` header values.
    /// A response without them resets the record to the defaults.
    pub fn update(&mut self, remaining: Option<i64>, reset_at: Option<i64>) {
        match (remaining, reset_at) {
            (Some(remaining), Some(reset_at)) => {
                self.remaining = remaining;
                self.reset_at = reset_at;
            }
            _ => *self = Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_quota_fails_until_reset() {
        let mut rl = RateLimit::default();
        rl.update(Some(0), Some(1000));

        let err = rl.check(999).unwrap_err();
        match err {
            ServiceError::RateLimited { reset_at } => assert_eq!(reset_at, 1000),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        // window has passed
        assert!(rl.check(1000).is_ok());
    }

    #[test]
    fn missing_headers_reset_to_defaults() {
        let mut rl = RateLimit {
            remaining: 0,
            reset_at: i64::MAX,
        };
        rl.update(None, None);
        assert_eq!(rl, RateLimit::default());
        assert!(rl.check(0).is_ok());
    }
}
