/// Similar to `info!` macro in tracing, and logs through it.
/// You can pass in the starting time and it will also log how long it took from starting time to now.
/// ```ignore
/// info_time!("str {}, {}", 1, 2);
/// let time = Local::now();
/// info_time!(time, "str {}, {}", 1, 2);
/// ```
#[macro_export]
macro_rules! info_time {
    ($strfm:literal $(, $arg:expr)* $(,)?) => {{
        ::tracing::info!("{}", format!($strfm, $($arg),*));
    }};
    ($time:expr, $strfm:literal $(, $arg:expr)* $(,)?) => {{
        let local_now = ::chrono::Local::now();
        let run_time = (local_now - $time)
                .num_microseconds()
                .map(|n| n as f64 / 1_000_000.0)
                .unwrap_or(0.0);
        ::tracing::info!("{} (RUNTIME: {:.3} sec)", format!($strfm, $($arg),*), run_time);
    }};
}

/// Seconds elapsed since `start`, for progress and ETA reporting.
#[macro_export]
macro_rules! secs_since {
    ($time:expr) => {{
        (::chrono::Local::now() - $time)
            .num_milliseconds()
            .max(0) as f64
            / 1_000.0
    }};
}
