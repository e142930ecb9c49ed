/// A free-running microsecond counter.
///
/// Only differences between two readings are ever used, computed with wrapping arithmetic, so a
/// 32-bit hardware timer that rolls over every ~71 minutes is fine. The counter must not depend on
/// interrupts being enabled, because it is read inside [`CriticalSection::with`].
///
/// Any `Fn() -> u32` closure is a clock, which keeps hardware glue down to a one-liner:
///
/// ```ignore
/// let clock = || timer1.capture();
/// ```
pub trait MicrosecondClock {
    fn now_us(&self) -> u32;

    /// Microseconds since `start`, tolerating one counter rollover.
    #[inline]
    fn elapsed_since(&self, start: u32) -> u32 {
        self.now_us().wrapping_sub(start)
    }
}

impl<F> MicrosecondClock for F
where
    F: Fn() -> u32,
{
    #[inline]
    fn now_us(&self) -> u32 {
        self()
    }
}

/// Busy-waits for `us` microseconds.
#[inline]
pub(crate) fn delay_us<C: MicrosecondClock>(clock: &C, us: u32) {
    let start = clock.now_us();
    while clock.elapsed_since(start) < us {}
}

/// Suppresses anything that could stall line sampling for more than a few microseconds.
///
/// The section lasts exactly as long as `f` runs, so it is released on every exit path out of
/// `f`, early returns included.
pub trait CriticalSection {
    fn with<R>(&mut self, f: impl FnOnce() -> R) -> R;
}

/// Masks interrupts through the [`critical_section`] crate.
///
/// The final binary must link a `critical-section` implementation for its target.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterruptFree;

impl CriticalSection for InterruptFree {
    fn with<R>(&mut self, f: impl FnOnce() -> R) -> R {
        critical_section::with(|_| f())
    }
}

/// Runs the timed section without masking anything. For hosted builds and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCriticalSection;

impl CriticalSection for NoCriticalSection {
    fn with<R>(&mut self, f: impl FnOnce() -> R) -> R {
        f()
    }
}
