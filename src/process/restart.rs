use crate::config::RestartSettings;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// What to do after a process exits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestartAction {
    /// Respawn immediately
    Restart,
    /// Respawn after the given delay
    Delay(Duration),
    /// Leave the process stopped
    Stop,
}

/// A policy decision with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartDecision {
    pub action: RestartAction,
    pub reason: String,
}

impl RestartDecision {
    /// Delay before the next spawn, zero for an immediate restart
    pub fn delay(&self) -> Option<Duration> {
        match self.action {
            RestartAction::Restart => Some(Duration::ZERO),
            RestartAction::Delay(delay) => Some(delay),
            RestartAction::Stop => None,
        }
    }
}

impl fmt::Display for RestartDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            RestartAction::Restart => write!(f, "restart now ({})", self.reason),
            RestartAction::Delay(delay) => write!(f, "restart in {:?} ({})", delay, self.reason),
            RestartAction::Stop => write!(f, "give up ({})", self.reason),
        }
    }
}

/// Always-restart policy with exponential backoff after rapid failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Exits sooner than this after the start are rapid failures
    pub min_uptime: Duration,
    /// Delay for the first rapid failure
    pub initial_backoff: Duration,
    /// Cap on the backoff delay
    pub max_backoff: Duration,
    /// Optional give-up threshold on the restart count
    pub max_restarts: Option<u32>,
}

impl RestartPolicy {
    pub fn from_settings(settings: &RestartSettings) -> Self {
        Self {
            min_uptime: Duration::from_millis(settings.min_uptime_ms),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_restarts: settings.max_restarts,
        }
    }

    /// Decide what follows an exit, treating every previous restart as part
    /// of the current rapid-failure streak.
    ///
    /// A clean exit restarts like any other. `last_exit_code` is `None` when the
    /// process was killed by a signal or never started.
    pub fn decide(
        &self,
        restart_count: u32,
        last_exit_code: Option<i32>,
        elapsed_since_last_start: Duration,
    ) -> RestartDecision {
        self.decide_with_streak(
            restart_count,
            restart_count,
            last_exit_code,
            elapsed_since_last_start,
        )
    }

    /// Decide what follows an exit. `restart_count` is checked against
    /// `max_restarts`; `rapid_failures` counts the consecutive rapid failures
    /// before this exit and drives the backoff exponent.
    pub fn decide_with_streak(
        &self,
        restart_count: u32,
        rapid_failures: u32,
        last_exit_code: Option<i32>,
        elapsed_since_last_start: Duration,
    ) -> RestartDecision {
        let exit = match last_exit_code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code".to_string(),
        };

        if let Some(max) = self.max_restarts {
            if restart_count >= max {
                return RestartDecision {
                    action: RestartAction::Stop,
                    reason: format!("{} after {} restarts (limit {})", exit, restart_count, max),
                };
            }
        }

        if elapsed_since_last_start >= self.min_uptime {
            return RestartDecision {
                action: RestartAction::Restart,
                reason: format!("{} after {:?} uptime", exit, elapsed_since_last_start),
            };
        }

        RestartDecision {
            action: RestartAction::Delay(self.backoff(rapid_failures)),
            reason: format!(
                "{} after {:?}, below minimum uptime {:?}",
                exit, elapsed_since_last_start, self.min_uptime
            ),
        }
    }

    /// initial * 2^rapid_failures, capped at max_backoff
    pub fn backoff(&self, rapid_failures: u32) -> Duration {
        let factor = 2_u32.saturating_pow(rapid_failures);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_settings(&RestartSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_default_settings() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.min_uptime, Duration::from_secs(1));
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.max_restarts, None);
    }

    #[test]
    fn test_clean_exit_after_long_run_restarts_immediately() {
        let policy = RestartPolicy::default();
        let decision = policy.decide(0, Some(0), Duration::from_secs(10));

        assert_eq!(decision.action, RestartAction::Restart);
        assert_eq!(decision.delay(), Some(Duration::ZERO));
    }

    #[test]
    fn test_rapid_crash_backs_off_further_each_time() {
        let policy = RestartPolicy::default();
        let previous = policy.decide(4, Some(1), Duration::from_millis(50));
        let decision = policy.decide(5, Some(1), Duration::from_millis(50));

        let previous_delay = previous.delay().unwrap();
        let delay = decision.delay().unwrap();
        assert!(delay > Duration::ZERO);
        assert!(delay > previous_delay);
        assert_eq!(decision.action, RestartAction::Delay(Duration::from_millis(3200)));
    }

    #[test]
    fn test_healthy_restarts_do_not_inflate_backoff() {
        let policy = RestartPolicy::default();

        // Ten long runs, then the first rapid crash
        let decision = policy.decide_with_streak(10, 0, Some(1), Duration::from_millis(50));
        assert_eq!(decision.action, RestartAction::Delay(Duration::from_millis(100)));

        let decision = policy.decide_with_streak(12, 2, Some(1), Duration::from_millis(50));
        assert_eq!(decision.action, RestartAction::Delay(Duration::from_millis(400)));
    }

    #[test]
    fn test_streak_does_not_bypass_max_restarts() {
        let settings = RestartSettings {
            max_restarts: Some(3),
            ..RestartSettings::default()
        };
        let policy = RestartPolicy::from_settings(&settings);

        let decision = policy.decide_with_streak(3, 0, Some(1), Duration::from_millis(50));
        assert_eq!(decision.action, RestartAction::Stop);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(9), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_signal_death_treated_like_failure() {
        let policy = RestartPolicy::default();
        let decision = policy.decide(0, None, Duration::from_millis(10));
        assert_eq!(decision.action, RestartAction::Delay(Duration::from_millis(100)));
        assert!(decision.reason.contains("no exit code"));
    }

    #[test]
    fn test_give_up_at_max_restarts() {
        let settings = RestartSettings {
            max_restarts: Some(3),
            ..RestartSettings::default()
        };
        let policy = RestartPolicy::from_settings(&settings);

        assert_eq!(
            policy.decide(2, Some(1), Duration::from_secs(5)).action,
            RestartAction::Restart
        );

        let decision = policy.decide(3, Some(1), Duration::from_secs(5));
        assert_eq!(decision.action, RestartAction::Stop);
        assert_eq!(decision.delay(), None);
        assert!(decision.to_string().starts_with("give up"));
    }
}
