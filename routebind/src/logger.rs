use chrono::Local;
use std::fmt;

fn log_line(level: &str, args: fmt::Arguments) -> String {
    format!("[{}] {} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), level, args)
}

pub fn info(args: fmt::Arguments) {
    println!("{}", log_line("INFO", args));
}

pub fn warn(args: fmt::Arguments) {
    println!("{}", log_line("WARN", args));
}

pub fn error(args: fmt::Arguments) {
    eprintln!("{}", log_line("ERROR", args));
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
