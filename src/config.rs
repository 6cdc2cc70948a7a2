use once_cell::sync::Lazy;

/// Address the service binds to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the service binds to. Defaults to `8000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000)
});

/// Retry hint (seconds) returned alongside a 202 while a commit receipt is pending.
pub static RETRY_AFTER_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("RETRY_AFTER_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(3)
});

/// Upper bound (milliseconds) on a single point-in-time receipt lookup.
pub static RECEIPT_TIMEOUT_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("RECEIPT_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1800)
});
