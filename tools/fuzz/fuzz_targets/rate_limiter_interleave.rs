#![no_main]

//! Fuzzes Component C's token bucket (`assistant_runtime::rate_limiter::RateLimiter`) against
//! arbitrary interleavings of `try_acquire` calls across a handful of keys, checking invariant
//! 3: `0 <= currentTokens <= capacity` holds after every call regardless of call order or cost.

use assistant_runtime::rate_limiter::RateLimiter;
use assistant_runtime::settings::{RateLimitConfig, RateLimitScope};
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

#[derive(Arbitrary, Debug)]
struct Input {
    capacity: u8,
    refill_per_second: u8,
    cost_per_request: u8,
    calls: Vec<Call>,
}

#[derive(Arbitrary, Debug)]
struct Call {
    key: KeyChoice,
}

#[derive(Arbitrary, Debug)]
enum KeyChoice {
    A,
    B,
    C,
}

impl KeyChoice {
    fn as_str(&self) -> &'static str {
        match self {
            KeyChoice::A => "a",
            KeyChoice::B => "b",
            KeyChoice::C => "c",
        }
    }
}

fuzz_target!(|input: Input| {
    // Zero capacity/cost are degenerate but must still never panic or violate the invariant.
    let config = RateLimitConfig {
        enabled: true,
        capacity: input.capacity as f64,
        refill_per_second: input.refill_per_second as f64,
        cost_per_request: input.cost_per_request as f64,
        scope: RateLimitScope::Process,
    };
    let limiter = RateLimiter::new(config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("build current-thread runtime");
    runtime.block_on(async {
        for call in &input.calls {
            let key = call.key.as_str();
            let _ = limiter.try_acquire(key).await;
            let state = limiter.state(key).await;
            assert!(state.current_tokens >= 0.0);
            assert!(state.current_tokens <= state.capacity);
        }
    });
});
