//! # QEMU Debug Console Support
//!
//! Log output for the kernel while it runs under QEMU. Everything the kernel
//! reports through the `log` facade ends up on QEMU's debug console.
//!
//! ## Output path
//!
//! ```text
//! log::info!/debug!/trace!
//!     ↓
//! QemuLogger (log::Log, level filter)
//!     ↓
//! qemu_trace! → QemuSink (fmt::Write)
//!     ↓
//! dbg_putc() → I/O port 0x402
//!     ↓
//! qemu-system-i386 -debugcon stdio
//! ```
//!
//! ## Features
//!
//! - `enabled` (default): port writes are compiled in on x86 targets.
//!   Without it, or on any other architecture, [`qemu_trace!`] expands to a
//!   no-op call.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! // Early in kernel initialization
//! QemuLogger::new(LevelFilter::Debug).init().ok();
//! info!("memory pools ready");
//! ```
//!
//! Host side:
//! ```bash
//! qemu-system-i386 -hda kernel.img -debugcon file:debug.log
//! ```
//!
//! Port `0x402` is an unused port on real hardware, so the writes are
//! harmless there. Port I/O needs ring 0.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single character to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe { outb(QEMU_DEBUG_PORT, c) }
    }

    /// Write to QEMU's port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    unsafe fn outb(port: u16, val: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }

        #[inline]
        fn write_char(&mut self, c: char) -> fmt::Result {
            // UTF-8 encode without allocation.
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            self.write_str(s)
        }
    }

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(args: fmt::Arguments) {
        // Ignore errors; this is best-effort debug output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[cfg(not(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64"))))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;
    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn qemu_write(_: fmt::Arguments) {
        // no-op when feature disabled
    }
}

/// Write `format!`-style output straight to the debug port.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        // No allocation: `format_args!` builds a lightweight `Arguments`.
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
