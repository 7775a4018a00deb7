//! Task-context logging.
//!
//! Prints through `esp-println` when the `esp32-log` feature is enabled.
//! Only call these outside critical sections and never from interrupt
//! context: a UART print takes milliseconds.

macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "esp32-log")]
        esp_println::println!("[dimmer] {}", format_args!($($arg)*));
        #[cfg(not(feature = "esp32-log"))]
        let _ = format_args!($($arg)*);
    }};
}

macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "esp32-log")]
        esp_println::println!("[dimmer] warning: {}", format_args!($($arg)*));
        #[cfg(not(feature = "esp32-log"))]
        let _ = format_args!($($arg)*);
    }};
}

pub(crate) use {log_info, log_warn};
