//! `ucontext_t` plumbing: capture, activate, and swap CPU contexts.
//!
//! Grounded in `original_source/xscheduler.h`'s `THREAD_SWITCH` macro
//! (`swapcontext(&old->context, &new->context)`) and `process.cpp`'s use of
//! `getcontext`/`setcontext` to install a worker's scheduler context on
//! first entry. This is the one place the design calls out for a narrowly
//! scoped `unsafe` shim (Design Notes): everything above this module talks
//! about threads and scheduling, nothing above it touches `ucontext_t`
//! directly.

use std::mem::MaybeUninit;

/// Wraps one `ucontext_t`. `Copy`-free on purpose: a context is identified
/// by its address (a TCB's embedded context, or a core-local scheduler
/// context), never duplicated.
pub struct Context {
    raw: libc::ucontext_t,
}

/// Entry point run on a freshly made context. Receives the two halves of a
/// pointer to a boxed `FnOnce` (`makecontext`'s varargs are `int`-sized, so
/// a 64-bit pointer has to be split -- the same trick userspace context
/// libraries such as the `context` crate use).
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

extern "C" fn trampoline(hi: u32, lo: u32) {
    let ptr = ((hi as usize) << 32) | (lo as usize);
    let boxed: Box<ThreadEntry> = unsafe { Box::from_raw(ptr as *mut ThreadEntry) };
    let f = *boxed;
    f();
    crate::thread::table::exit_current(0);
}

impl Context {
    pub fn new() -> Self {
        Context { raw: unsafe { MaybeUninit::zeroed().assume_init() } }
    }

    /// Captures the calling thread's current machine state into `self`.
    ///
    /// # Safety
    /// Must run on the stack/thread whose state is being captured.
    pub unsafe fn capture(&mut self) {
        let rc = libc::getcontext(&mut self.raw);
        assert_eq!(rc, 0, "getcontext failed");
    }

    /// Builds a new context that starts executing `entry` on `stack` when
    /// first resumed. `link` is the context control returns to if `entry`
    /// returns normally (should never happen: `trampoline` always calls
    /// `exit_current` instead) -- `None` leaves it null, matching threads
    /// that must always terminate via an explicit exit.
    ///
    /// # Safety
    /// `stack` must remain live and unaliased for as long as this context
    /// might run.
    pub unsafe fn make(&mut self, stack: &mut [u8], link: Option<*mut Context>, entry: ThreadEntry) {
        libc::getcontext(&mut self.raw);
        self.raw.uc_stack.ss_sp = stack.as_mut_ptr() as *mut libc::c_void;
        self.raw.uc_stack.ss_size = stack.len();
        self.raw.uc_link = match link {
            Some(ctx) => &mut (*ctx).raw as *mut libc::ucontext_t,
            None => std::ptr::null_mut(),
        };
        let boxed: Box<ThreadEntry> = Box::new(entry);
        let ptr = Box::into_raw(boxed) as usize;
        let hi = (ptr >> 32) as u32;
        let lo = (ptr & 0xFFFF_FFFF) as u32;
        let entry_fn: extern "C" fn() = std::mem::transmute(trampoline as extern "C" fn(u32, u32));
        libc::makecontext(&mut self.raw, entry_fn, 2, hi, lo);
    }

    /// Swaps execution from `from` to `to`: saves the caller's state into
    /// `from` and resumes `to`. Returns once some other `swap` resumes
    /// `from` again. This is the runtime's only context-switch primitive;
    /// the scheduler loop and the three yield primitives are built
    /// entirely out of calls to this one function.
    ///
    /// # Safety
    /// `to` must hold a context previously produced by [`Context::capture`]
    /// or [`Context::make`], whose stack is still live.
    pub unsafe fn swap(from: *mut Context, to: *mut Context) {
        let rc = libc::swapcontext(&mut (*from).raw, &(*to).raw);
        assert_eq!(rc, 0, "swapcontext failed");
    }

    /// Activates `self`, never returning to the caller.
    ///
    /// # Safety
    /// `self` must hold a valid, resumable context.
    pub unsafe fn activate(&self) -> ! {
        libc::setcontext(&self.raw);
        unreachable!("setcontext returned");
    }

    /// Overwrites `self` with a byte copy of `*other`.
    ///
    /// Used only by the SIGSEGV migration path (`signal` module): the
    /// kernel's own signal-return context already holds the faulting
    /// thread's exact resume point, so the handler copies it straight into
    /// the TCB rather than capturing a fresh one with `getcontext`.
    ///
    /// # Safety
    /// `other` must point to a live, fully-initialized `ucontext_t`.
    pub unsafe fn load_from(&mut self, other: *const libc::ucontext_t) {
        std::ptr::copy_nonoverlapping(other, &mut self.raw, 1);
    }

    /// Raw pointer to the embedded `ucontext_t`, for overwriting a signal
    /// frame's context in place (`signal` module's migration path).
    ///
    /// # Safety
    /// The caller must not use the returned pointer past `self`'s lifetime.
    pub unsafe fn as_raw(&self) -> *const libc::ucontext_t {
        &self.raw
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}
