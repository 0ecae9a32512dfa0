//! Minimal console-style diagnostics.
//!
//! Grounded in the teacher's `printf.rs`/`console.rs`: no external logging
//! crate, a single global sink written through under a spinlock, and
//! `print!`/`println!`-shaped macros. `kprintln!` is the filesystem-specific
//! analogue, used for recovery-scan progress and journal-poison notices.

use core::fmt;

use crate::lock::RawSpinlock;

/// Anything that can receive formatted diagnostic output.
pub trait Sink: Send {
    fn write_str(&mut self, s: &str);
}

struct NullSink;

impl Sink for NullSink {
    fn write_str(&mut self, _s: &str) {}
}

static SINK_LOCK: RawSpinlock = RawSpinlock::new("diagnostics");
static mut SINK: Option<alloc::boxed::Box<dyn Sink>> = None;

/// Installs the global diagnostics sink. Call once at mount; later calls
/// replace the previous sink.
pub fn set_sink(sink: alloc::boxed::Box<dyn Sink>) {
    let _guard = SINK_LOCK.lock();
    // SAFETY: `SINK_LOCK` serializes every access to `SINK`.
    unsafe {
        SINK = Some(sink);
    }
}

struct SinkWriter;

impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // SAFETY: `SINK_LOCK` is held by the caller of `_kprint`.
        let sink = unsafe { SINK.get_or_insert_with(|| alloc::boxed::Box::new(NullSink)) };
        sink.write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _kprint(args: fmt::Arguments<'_>) {
    use fmt::Write;
    let _guard = SINK_LOCK.lock();
    let _ = SinkWriter.write_fmt(args);
}

/// Prints a diagnostic line without a trailing newline.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::diagnostics::_kprint(format_args!($($arg)*)));
}

/// Prints a diagnostic line.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
