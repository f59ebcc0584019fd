/// Logs an error that takes the monitor down. Wraps `tracing::error!` with
/// `alert = true` and `severity = "critical"` so alerting can key on it.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => {
        ::tracing::error!(
            alert = true,
            severity = "critical",
            $($arg)*
        )
    };
}
