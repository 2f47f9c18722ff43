//! SIGSEGV-based page-fault migration trap.
//!
//! Grounded in `original_source/include/xmemory.h`'s `installSignalHandler`/
//! `segvHandle` and `xsignal.h`'s altstack setup. Every managed page starts
//! life `PROT_NONE`; a first touch raises `SIGSEGV`, and this handler
//! decides, from the owner table, whether to claim the page for this core
//! or migrate the faulting thread onto the core that already owns it.

use std::mem::MaybeUninit;

use libc::{c_int, c_void, siginfo_t};

use crate::error::{fatal, RuntimeError};
use crate::page::{OwnerTable, ProtectedRegion};
use crate::runtime::{self, Runtime};
use crate::sched;
use crate::thread::tcb::ThreadStatus;
use crate::types::{CoreId, CORE_NONE};

const ALT_STACK_SIZE: usize = 64 * 1024;

/// Installs an altstack and the process-wide `SIGSEGV` handler. Called once
/// by every worker immediately after it starts (spec.md §4.8 step 9, before
/// any user thread runs), since the very first touch of a managed page can
/// fault before the scheduler loop has even dequeued anything.
pub fn install() -> Result<(), RuntimeError> {
    unsafe {
        let stack = libc::malloc(ALT_STACK_SIZE);
        if stack.is_null() {
            return Err(RuntimeError::os("malloc altstack"));
        }
        let ss = libc::stack_t { ss_sp: stack, ss_flags: 0, ss_size: ALT_STACK_SIZE };
        if libc::sigaltstack(&ss, std::ptr::null_mut()) != 0 {
            return Err(RuntimeError::os("sigaltstack"));
        }

        let mut sa: libc::sigaction = MaybeUninit::zeroed().assume_init();
        sa.sa_sigaction = handle_segv as usize;
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK | libc::SA_RESTART | libc::SA_NODEFER;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(libc::SIGSEGV, &sa, std::ptr::null_mut()) != 0 {
            return Err(RuntimeError::os("sigaction"));
        }
    }
    log::debug!("SIGSEGV migration handler installed");
    Ok(())
}

extern "C" fn handle_segv(_sig: c_int, info: *mut siginfo_t, ctx: *mut c_void) {
    let rt = runtime::active();
    let addr = unsafe { (*info).si_addr() as usize };
    let code = unsafe { (*info).si_code };

    if code != libc::SEGV_ACCERR {
        fatal("page fault was not an access-permission violation on a managed page");
    }

    let (region, owner): (&ProtectedRegion, &OwnerTable) = if rt.heap_region.in_range(addr) {
        (&rt.heap_region, &rt.heap_owner)
    } else if rt.globals_region.in_range(addr) {
        (&rt.globals_region, &rt.globals_owner)
    } else {
        fatal("page fault outside every managed region");
    };

    let page = region.page_index(addr);
    let core = unsafe { sched::current() }.core();
    let my_core = core as u32;

    let owner_of_page = owner.get_owner(&rt.arena, page);
    if owner_of_page == CORE_NONE {
        if owner.acquire_ownership(&rt.arena, page, my_core) {
            unprotect_or_abort(region, page);
            return;
        }
        // Lost the CAS race to another core; re-read and fall through to
        // the owned-elsewhere path below.
    } else if owner_of_page == my_core {
        // Spurious refault on a page we already own -- spec.md §4.3:
        // "handled identically to the owned branch for robustness but
        // expected to be rare".
        unprotect_or_abort(region, page);
        return;
    }

    migrate(rt, owner, page, ctx as *mut libc::ucontext_t);
}

fn unprotect_or_abort(region: &ProtectedRegion, page: usize) {
    if let Err(e) = region.unprotect_page(page) {
        fatal(&format!("unprotect_page failed: {e}"));
    }
}

/// Moves the faulting thread onto the owning core's private queue.
///
/// Saves the kernel-supplied signal context (the faulting thread's exact
/// resume point) into its TCB, enqueues the TCB, then overwrites that same
/// signal context in place with this core's scheduler context. When the
/// handler returns, the kernel's `sigreturn` resumes the scheduler loop
/// instead of the faulting instruction -- the owned page is left
/// `PROT_NONE` on this core permanently (spec.md §4.3: "ownership is
/// sticky, and only the thread migrates").
fn migrate(rt: &Runtime, owner: &OwnerTable, page: usize, uctx: *mut libc::ucontext_t) {
    let owner_core = owner.get_owner(&rt.arena, page) as CoreId;
    let me = unsafe { sched::current() };
    let tcb_off = me.current_thread().expect("page fault with no thread running on this core");
    let tcb = unsafe { &mut *rt.arena.resolve(tcb_off) };

    unsafe { tcb.context.load_from(uctx) };
    tcb.set_status(ThreadStatus::Ready);
    rt.private_queue(owner_core).enqueue(&rt.arena, tcb_off);
    log::debug!("migrating thread {} to core {owner_core} for page {page}", tcb.tid);

    unsafe {
        let sched_ctx = me.self_ctx_raw();
        std::ptr::copy_nonoverlapping(sched_ctx, uctx, 1);
    }
}
