//! Conservative machine stack scanning.
//!
//! Spills callee-saved registers onto the stack and hands every word
//! between the current stack pointer and the base of the thread's stack to
//! [`ConservativeRoots`].

use crate::gc::{ConservativeRoots, RootScanner};

/// Bounds of a thread's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    /// The base of the stack (highest address).
    pub bottom: usize,
    /// The limit of the stack (lowest address).
    pub top: usize,
}

/// Retrieve the stack bounds for the current thread.
#[cfg(all(target_os = "linux", not(miri)))]
#[must_use]
pub fn get_stack_bounds() -> Option<StackBounds> {
    use libc::{
        pthread_attr_destroy, pthread_attr_getstack, pthread_attr_t, pthread_getattr_np,
        pthread_self,
    };

    // SAFETY: `attr` is initialized by `pthread_getattr_np` before use and
    // destroyed exactly once.
    unsafe {
        let mut attr: pthread_attr_t = std::mem::zeroed();
        if pthread_getattr_np(pthread_self(), &raw mut attr) != 0 {
            return None;
        }

        let mut stackaddr: *mut libc::c_void = std::ptr::null_mut();
        let mut stacksize: libc::size_t = 0;
        let ret = pthread_attr_getstack(&raw const attr, &raw mut stackaddr, &raw mut stacksize);
        pthread_attr_destroy(&raw mut attr);
        if ret != 0 {
            return None;
        }

        let top = stackaddr as usize;
        Some(StackBounds {
            bottom: top + stacksize,
            top,
        })
    }
}

/// Stack bounds are only known on Linux; elsewhere nothing is scanned.
#[cfg(any(not(target_os = "linux"), miri))]
#[must_use]
pub const fn get_stack_bounds() -> Option<StackBounds> {
    None
}

/// Spill CPU registers onto the stack and call `scan_fn` with every word
/// of the spilled registers and of the live part of the stack.
///
/// # Safety
///
/// Must run on the thread whose stack `get_stack_bounds` describes.
#[inline(never)]
pub unsafe fn spill_registers_and_scan<F>(mut scan_fn: F)
where
    F: FnMut(usize),
{
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    let mut regs = [0usize; 6];
    #[cfg(all(target_arch = "x86_64", not(miri)))]
    // SAFETY: only reads callee-saved registers into locals.
    unsafe {
        std::arch::asm!(
            "mov {0}, rbx",
            "mov {1}, rbp",
            "mov {2}, r12",
            "mov {3}, r13",
            "mov {4}, r14",
            "mov {5}, r15",
            out(reg) regs[0],
            out(reg) regs[1],
            out(reg) regs[2],
            out(reg) regs[3],
            out(reg) regs[4],
            out(reg) regs[5],
        );
    }

    // Elsewhere a large enough local array stands in for the register file.
    #[cfg(any(not(target_arch = "x86_64"), miri))]
    let regs = [0usize; 32];
    std::hint::black_box(&regs);

    for &reg in &regs {
        scan_fn(reg);
    }

    let Some(bounds) = get_stack_bounds() else {
        return;
    };

    // The stack grows downwards, so everything above this frame is live.
    let sp = std::ptr::addr_of!(scan_fn) as usize;
    let mut current = sp & !(std::mem::align_of::<usize>() - 1);
    while current < bounds.bottom {
        // SAFETY: `[sp, bottom)` is the mapped, live stack of this thread.
        let word = unsafe { std::ptr::read_volatile(current as *const usize) };
        scan_fn(word);
        current += std::mem::size_of::<usize>();
    }
}

/// A [`RootScanner`] over the current thread's registers and stack.
///
/// Enabled with
/// [`HeapConfig::scan_machine_stack`](crate::HeapConfig::scan_machine_stack).
#[derive(Debug, Default, Clone, Copy)]
pub struct MachineStackScanner;

impl RootScanner for MachineStackScanner {
    fn gather_conservative_roots(&mut self, roots: &mut ConservativeRoots<'_>) {
        // SAFETY: collections run on the thread that owns the heap.
        unsafe {
            spill_registers_and_scan(|word| {
                roots.add(word);
            });
        }
    }
}
