//! Property tests for the traffic policy and settings parsing.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tokio::time::Instant;

use tab_relay::RelayKey;
use tab_relay::config::clamp_port;
use tab_relay::policy::{Allowlist, RateLimiter, WindowEdge};

proptest! {
    #[test]
    fn limiter_never_admits_more_than_limit_per_window(
        limit in 1u32..50,
        hits in 0usize..200,
    ) {
        let limiter = RateLimiter::new(limit, Duration::from_secs(1), WindowEdge::Inclusive);
        let now = Instant::now();

        let admitted = (0..hits).filter(|_| limiter.try_acquire_at(now)).count();
        prop_assert_eq!(admitted, hits.min(limit as usize));
    }

    #[test]
    fn limiter_window_reopens(limit in 1u32..20, extra_ms in 0u64..5_000) {
        let window = Duration::from_secs(1);
        let limiter = RateLimiter::new(limit, window, WindowEdge::Inclusive);
        let start = Instant::now();

        for _ in 0..=limit {
            limiter.try_acquire_at(start);
        }
        prop_assert!(!limiter.try_acquire_at(start + window - Duration::from_millis(1)));
        prop_assert!(limiter.try_acquire_at(start + window + Duration::from_millis(extra_ms)));
    }

    #[test]
    fn clamped_port_is_always_usable(raw in any::<i64>()) {
        let port = clamp_port(Some(&json!(raw)));
        prop_assert!(port >= 1);
        if (1..=65535).contains(&raw) {
            prop_assert_eq!(i64::from(port), raw);
        }
    }

    #[test]
    fn credential_is_trimmed(port in 1u16.., token in "[a-z0-9]{0,12}") {
        let padded = RelayKey::new(port, format!("  {token}\t"));
        prop_assert_eq!(padded, RelayKey::new(port, token.as_str()));
    }

    #[test]
    fn unknown_methods_are_refused(name in "[A-Z][a-z]{2,8}\\.[a-z]{3,10}Xyz") {
        let list = Allowlist::standard();
        prop_assert!(!list.allows_command(&name));
        prop_assert!(!list.allows_event(&name));
    }
}

#[test]
fn exclusive_edge_keeps_the_boundary_instant() {
    let window = Duration::from_secs(60);
    let limiter = RateLimiter::new(1, window, WindowEdge::Exclusive);
    let start = Instant::now();

    assert!(limiter.try_acquire_at(start));
    assert!(!limiter.try_acquire_at(start + window));
    assert!(limiter.try_acquire_at(start + window + Duration::from_millis(1)));
}
