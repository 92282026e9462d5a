#![cfg(feature = "serde")]

use codebroker::{PoolConfig, ResolverConfig};
use std::time::Duration;

#[test]
fn partial_documents_fill_in_defaults() {
    let config: ResolverConfig =
        serde_json::from_str(r#"{ "max_strong": 10, "pool": { "max_active": 4 } }"#).unwrap();
    assert_eq!(config.max_strong().map(|n| n.get()), Some(10));
    assert_eq!(config.find_max_strong().get(), 32);
    assert_eq!(config.pool().max_active(), 4);
    assert_eq!(config.pool().min_idle(), PoolConfig::default().min_idle());
}

#[test]
fn null_limit_means_unbounded() {
    let config: ResolverConfig = serde_json::from_str(r#"{ "max_strong": null }"#).unwrap();
    assert_eq!(config.max_strong(), None);
}

#[test]
fn invalid_pools_are_rejected_while_parsing() {
    assert!(serde_json::from_str::<ResolverConfig>(r#"{ "pool": { "max_active": 0 } }"#).is_err());
    assert!(serde_json::from_str::<ResolverConfig>(
        r#"{ "pool": { "min_idle": 3, "max_idle": 1 } }"#
    )
    .is_err());
    assert!(serde_json::from_str::<ResolverConfig>(r#"{ "max_strong": 0 }"#).is_err());
    assert!(serde_json::from_str::<ResolverConfig>(
        r#"{ "pool": { "max_active": 18446744073709551615 } }"#
    )
    .is_err());
}

#[test]
fn written_config_reads_back() {
    let pool = PoolConfig::builder()
        .max_active(8)
        .idle_eviction_age(Some(Duration::from_secs(30)))
        .build()
        .unwrap();
    let config = ResolverConfig::default().with_pool(pool);
    let json = serde_json::to_string(&config).unwrap();
    let back: ResolverConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
