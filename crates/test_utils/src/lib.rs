#![deny(missing_docs)]
//! Test utilities for the queued backing store.

use rand::RngCore;

pub mod id;
pub mod object;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .with_test_writer()
        .try_init();
}

/// Create random bytes of a specified length.
pub fn random_bytes(length: u16) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0; length as usize];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Repeatedly check a condition until it succeeds or a timeout elapses.
///
/// The body is re-run every `interval_ms` (default 1). Use `break` to
/// finish, or `return value` to finish with a value. Panics if the
/// check does not finish within `timeout_ms` (default 1000).
#[macro_export]
macro_rules! iter_check {
    ($timeout_ms:literal, $interval_ms:literal, $code:block) => {
        tokio::time::timeout(
            std::time::Duration::from_millis($timeout_ms),
            async {
                loop {
                    $code

                    tokio::time::sleep(std::time::Duration::from_millis(
                        $interval_ms,
                    ))
                    .await;
                }
            },
        )
        .await
        .expect("iter_check timed out")
    };
    ($timeout_ms:literal, $code:block) => {
        $crate::iter_check!($timeout_ms, 1, $code)
    };
    ($code:block) => {
        $crate::iter_check!(1000, $code)
    };
}
