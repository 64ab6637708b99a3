use std::sync::Arc;

use chrono::Duration;
use proptest::prelude::*;

use vaultgate_token::{StaticKeys, TokenEngine, TokenEngineConfig, ValidationOutcome};
use vaultgate_types::ManualClock;

fn strict_engine(clock: &ManualClock) -> TokenEngine {
    let mut config = TokenEngineConfig::new("vaultgate", "payments-internal");
    config.iat_skew = Duration::zero();
    config.exp_skew = Duration::zero();
    TokenEngine::new(
        config,
        Arc::new(StaticKeys::single("kid-1", [7u8; 32])),
        Arc::new(clock.clone()),
    )
}

proptest! {
    // With zero skew a token minted with a 1 h TTL is valid at every offset
    // in [0, 3600) and expired at every offset in [3600, ...).
    #[test]
    fn expiry_window_is_half_open(offset_secs in 0i64..7200i64) {
        let clock = ManualClock::from_system();
        let engine = strict_engine(&clock);

        let minted = tokio_test::block_on(engine.mint("vendor-A", vec![], None)).unwrap();
        clock.advance(Duration::seconds(offset_secs));
        let outcome = tokio_test::block_on(engine.verify(&minted.raw, None)).unwrap();

        if offset_secs < 3600 {
            prop_assert!(matches!(outcome, ValidationOutcome::Valid(_)), "offset {}", offset_secs);
        } else {
            prop_assert_eq!(outcome, ValidationOutcome::Expired);
        }
    }

    // The grace window shifts the expiry edge by exactly the configured skew.
    #[test]
    fn grace_shifts_the_expiry_edge(skew in prop_oneof![Just(0i64), Just(30), Just(60)],
                                    past_expiry in 0i64..120i64) {
        let clock = ManualClock::from_system();
        let mut config = TokenEngineConfig::new("vaultgate", "payments-internal");
        config.exp_skew = Duration::seconds(skew);
        let engine = TokenEngine::new(
            config,
            Arc::new(StaticKeys::single("kid-1", [7u8; 32])),
            Arc::new(clock.clone()),
        );

        let minted = tokio_test::block_on(engine.mint("vendor-A", vec![], None)).unwrap();
        clock.advance(Duration::seconds(3600 + past_expiry));
        let outcome = tokio_test::block_on(engine.verify(&minted.raw, None)).unwrap();

        if past_expiry < skew {
            prop_assert!(matches!(outcome, ValidationOutcome::Valid(_)));
        } else {
            prop_assert_eq!(outcome, ValidationOutcome::Expired);
        }
    }
}
