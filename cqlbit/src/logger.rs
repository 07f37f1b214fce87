use chrono::Local;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Turns `debug!` output on or off for the whole process.
pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

pub fn debug(args: fmt::Arguments) {
    if debug_enabled() {
        let now = Local::now();
        println!("[{}] DEBUG {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), args);
    }
}

pub fn info(args: fmt::Arguments) {
    let now = Local::now();
    println!("[{}] INFO {}", now.format("%Y-%m-%d %H:%M:%S"), args);
}

pub fn warn(args: fmt::Arguments) {
    let now = Local::now();
    println!("[{}] WARN {}", now.format("%Y-%m-%d %H:%M:%S"), args);
}

pub fn error(args: fmt::Arguments) {
    let now = Local::now();
    eprintln!("[{}] ERROR {}", now.format("%Y-%m-%d %H:%M:%S"), args);
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logger::debug(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logger::info(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logger::warn(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logger::error(format_args!($($arg)*))
    };
}
