use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

/// Configurable REST rate limit values, read from environment variables.
///
/// - `RATE_LIMIT_MESSAGES` — Max message sends per minute per IP (default: 60)
/// - `RATE_LIMIT_ROOMS` — Max room creations per hour per IP (default: 10)
pub struct RateLimitConfig {
    pub messages_max: usize,
    pub messages_window_secs: u64,
    pub rooms_max: usize,
    pub rooms_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_max: 60,
            messages_window_secs: 60,
            rooms_max: 10,
            rooms_window_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_MESSAGES")
            && let Ok(n) = val.parse::<usize>()
        {
            config.messages_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_ROOMS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.rooms_max = n;
        }

        config
    }
}

/// Sliding-window request counter keyed by "action:ip".
pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires.
    /// 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request fits in the window, recording it if so.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let retry_after = match entries.iter().min() {
                Some(oldest) => {
                    let elapsed = now.duration_since(*oldest);
                    if elapsed < window {
                        (window - elapsed).as_secs() + 1
                    } else {
                        1
                    }
                }
                None => 1,
            };
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining: max - entries.len(),
            retry_after_secs: 0,
        }
    }
}
