//! Common utilities for pgas integration tests.

// Test utilities may not all be used in every test file
#![allow(dead_code)]

use std::sync::Once;

use fabric::FabricConfig;
use pgas::{BasicType, Config, DataType, Runtime, launch};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Install a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Small configuration keeping per-unit allocations cheap.
pub fn test_config() -> Config {
    Config::default()
        .with_local_alloc_size(64 * 1024)
        .with_pool_size(16)
}

/// Run `f` on `n` units and return every unit's result in unit order.
pub fn run<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Runtime) -> pgas::Result<T> + Sync,
{
    run_with(n, FabricConfig::default(), test_config(), f)
}

pub fn run_with<T, F>(n: usize, fabric: FabricConfig, config: Config, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&Runtime) -> pgas::Result<T> + Sync,
{
    init_tracing();
    launch(n, fabric, config, f).unwrap()
}

pub fn int() -> DataType {
    DataType::Basic(BasicType::Int)
}

pub fn byte() -> DataType {
    DataType::Basic(BasicType::Byte)
}

pub fn long() -> DataType {
    DataType::Basic(BasicType::Long)
}

/// Deterministic payload of `len` values for `unit`.
pub fn payload(unit: u32, len: usize) -> Vec<i32> {
    let mut rng = SmallRng::seed_from_u64(0x5eed + u64::from(unit));
    (0..len).map(|_| rng.random_range(-1000..1000)).collect()
}
