//! # Stack Tracing
//!
//! Call-stack capture at allocation time and symbol resolution at teardown,
//! behind a narrow trait so the heap itself stays platform independent.

/// Maximum number of frames stored per allocation record.
pub const MAX_TRACE_FRAMES: usize = 8;

/// Captures instruction pointers and resolves them to names.
pub trait StackTracer: Send + Sync {
    /// Fills `frames` with return addresses of the calling stack, innermost
    /// first, and returns how many were written.
    fn capture(&self, frames: &mut [usize]) -> usize;

    /// Resolves an instruction address to a symbol name, if known.
    fn resolve(&self, ip: usize) -> Option<String>;
}

/// Stack tracer using the platform unwinder and debug info.
#[derive(Clone, Copy, Debug)]
pub struct NativeTracer {
    skip: usize,
}

impl NativeTracer {
    /// Frames pushed by the unwinder before the first callback.
    pub const UNWINDER_FRAMES: usize = 2;

    /// Unwinder frames plus this tracer's `capture` and the heap's `alloc`,
    /// so the first recorded frame is the caller of `alloc`.
    pub const DEFAULT_SKIP: usize = Self::UNWINDER_FRAMES + 2;

    /// Creates a tracer that drops the innermost `skip` frames.
    #[must_use]
    pub const fn new(skip: usize) -> Self {
        Self { skip }
    }
}

impl Default for NativeTracer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SKIP)
    }
}

impl StackTracer for NativeTracer {
    #[inline(never)]
    fn capture(&self, frames: &mut [usize]) -> usize {
        if frames.is_empty() {
            return 0;
        }
        let mut skipped = 0;
        let mut written = 0;
        backtrace::trace(|frame| {
            if skipped < self.skip {
                skipped += 1;
                return true;
            }
            frames[written] = frame.ip() as usize;
            written += 1;
            written < frames.len()
        });
        written
    }

    fn resolve(&self, ip: usize) -> Option<String> {
        let mut name = None;
        backtrace::resolve(ip as *mut std::ffi::c_void, |symbol| {
            if name.is_none() {
                name = symbol.name().map(|n| n.to_string());
            }
        });
        name
    }
}

/// Stack tracer that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTracer;

impl StackTracer for NullTracer {
    fn capture(&self, _frames: &mut [usize]) -> usize {
        0
    }

    fn resolve(&self, _ip: usize) -> Option<String> {
        None
    }
}

/// Renders a frame for a leak report: the symbol name, or the raw address.
#[must_use]
pub fn describe_frame(tracer: &dyn StackTracer, ip: usize) -> String {
    tracer
        .resolve(ip)
        .unwrap_or_else(|| format!("{ip:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_capture_is_bounded() {
        let tracer = NativeTracer::new(0);
        let mut frames = [0usize; 3];
        let n = tracer.capture(&mut frames);
        assert!(n <= 3);
        assert!(frames[..n].iter().all(|ip| *ip != 0));
        assert_eq!(tracer.capture(&mut []), 0);
    }

    #[test]
    fn test_unresolved_frame_uses_raw_address() {
        assert_eq!(describe_frame(&NullTracer, 0xdead), "0xdead");
    }
}
