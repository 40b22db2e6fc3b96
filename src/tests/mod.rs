#![cfg(test)]

mod blocking;
mod death;
mod mutex;
mod recursive;
mod registry;
mod spin;

/// Routes the crate's log output to the test harness; filter with
/// `RUST_LOG=futex_sync=trace`.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
