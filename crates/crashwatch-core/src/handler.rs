//! # Process-wide fatal event handlers
//!
//! Installs one `sigaction` handler for every [`FatalSignal`] and a panic
//! hook, all routing into the single active [`CrashManager`].
//!
//! ## Async-signal safety
//!
//! `on_fatal_signal` runs on the faulting thread while the heap and any lock
//! that thread held may be in an inconsistent state. It keeps to:
//!
//! - atomics (`ACTIVE`, `CAPTURE_IN_PROGRESS`)
//! - a preallocated static frame buffer for the raw stack walk
//! - `sigaction` and `raise` to hand the signal back to the previous action
//!
//! It does not log. Symbolizing the captured frames and writing the report
//! (inside [`CrashManager::record_captured`]) allocate: that second phase
//! runs only after the raw frames are secured, and is the one localized
//! place where signal-unsafe work is accepted.
//!
//! ## Handler stack
//!
//! Symbolization needs far more stack than the few KiB the runtime gives each
//! thread's alternate signal stack. Only `SIGSEGV` and `SIGBUS` (which may be
//! a stack overflow) run on an alternate stack; the installing thread gets a
//! dedicated [`ALT_STACK_SIZE`] stack for them. Every other fatal signal runs
//! on the faulting thread's own stack. When a stack fault lands on some other
//! thread's small alternate stack the report is skipped and the signal is
//! handed on unchanged.
//!
//! ## Chaining
//!
//! Whatever was installed before (another crash reporter, the runtime's
//! stack overflow handler, `SIG_DFL`) is saved, restored before the signal
//! is re-raised, and restored again by [`uninstall`]. The previous panic hook
//! runs after ours records the panic.

use std::cell::UnsafeCell;
use std::panic::{self, PanicHookInfo};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::CrashResult;
use crate::manager::CrashManager;
use crate::tracer::MAX_CAPTURE_DEPTH;
use crate::types::{FailureIdentity, FatalSignal};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// The manager that owns the handlers, or null when none is installed.
static ACTIVE: AtomicPtr<CrashManager> = AtomicPtr::new(ptr::null_mut());

/// Set while a fatal capture is running anywhere in the process.
static CAPTURE_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Serializes [`install`] and [`uninstall`].
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Panic hook that was installed before ours.
static PREVIOUS_HOOK: Mutex<Option<Arc<PanicHook>>> = Mutex::new(None);

/// Raw frame buffer for the signal path, so capture never touches the heap.
struct FrameBuffer(UnsafeCell<[usize; MAX_CAPTURE_DEPTH]>);

// SAFETY: only the thread that wins `CAPTURE_IN_PROGRESS` touches the buffer.
unsafe impl Sync for FrameBuffer {}

static FRAME_BUFFER: FrameBuffer = FrameBuffer(UnsafeCell::new([0; MAX_CAPTURE_DEPTH]));

#[cfg(unix)]
struct SavedActions(UnsafeCell<[std::mem::MaybeUninit<libc::sigaction>; FatalSignal::ALL.len()]>);

// SAFETY: slots are written by `sigaction` under `INSTALL_LOCK` before the
// matching handler can run, and only read afterward.
#[cfg(unix)]
unsafe impl Sync for SavedActions {}

#[cfg(unix)]
static SAVED_ACTIONS: SavedActions =
    SavedActions(UnsafeCell::new([const { std::mem::MaybeUninit::uninit() }; FatalSignal::ALL.len()]));

/// Usable size of the alternate stack registered by [`install`].
#[cfg(unix)]
pub(crate) const ALT_STACK_SIZE: usize = 1024 * 1024;

/// Smallest alternate stack the signal path will symbolize and write on.
#[cfg(unix)]
const MIN_HANDLER_STACK: usize = 256 * 1024;

/// The alternate stack mapped by [`install`] and the one it replaced.
#[cfg(unix)]
struct AltStack
{
    /// Start of the mapping, including the guard page.
    mapping: *mut libc::c_void,
    mapping_len: usize,
    previous: libc::stack_t,
    thread: libc::pthread_t,
}

// SAFETY: the mapping is only touched by the kernel while a handler runs and
// by `install`/`uninstall` under `INSTALL_LOCK`.
#[cfg(unix)]
unsafe impl Send for AltStack {}

#[cfg(unix)]
static ALT_STACK: Mutex<Option<AltStack>> = Mutex::new(None);

/// Make `manager` the process-wide crash manager.
///
/// Installing the same manager again is a no-op.
///
/// ## Errors
///
/// - `CrashError::ManagerConflict` if a different manager is installed.
/// - `CrashError::SignalInstall` if `sigaction` rejects a handler. Handlers
///   installed before the failure are rolled back.
pub(crate) fn install(manager: &'static CrashManager) -> CrashResult<()>
{
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    let candidate = ptr::from_ref(manager).cast_mut();
    let current = ACTIVE.load(Ordering::Acquire);
    if current == candidate {
        return Ok(());
    }
    if !current.is_null() {
        return Err(crate::error::CrashError::ManagerConflict);
    }

    install_signal_handlers()?;
    install_alt_stack();
    install_panic_hook();
    ACTIVE.store(candidate, Ordering::Release);
    Ok(())
}

/// Put back the handlers that were active before [`install`].
///
/// Does nothing unless `manager` is the installed manager.
///
/// ## Errors
///
/// Returns `CrashError::SignalInstall` for the first signal whose previous
/// action could not be restored. The remaining signals are still restored.
pub(crate) fn uninstall(manager: &CrashManager) -> CrashResult<()>
{
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    if ACTIVE.load(Ordering::Acquire) != ptr::from_ref(manager).cast_mut() {
        return Ok(());
    }

    restore_panic_hook();
    let mut result = Ok(());
    for signal in FatalSignal::ALL {
        if let Err(err) = restore_signal_handler(signal) {
            if result.is_ok() {
                result = Err(err);
            }
        }
    }
    restore_alt_stack();
    ACTIVE.store(ptr::null_mut(), Ordering::Release);
    result
}

/// `true` if `manager` currently owns the process-wide handlers.
pub(crate) fn is_installed(manager: &CrashManager) -> bool
{
    ACTIVE.load(Ordering::Acquire) == ptr::from_ref(manager).cast_mut()
}

fn install_panic_hook()
{
    let previous: Arc<PanicHook> = Arc::new(panic::take_hook());
    let chained = Arc::clone(&previous);
    *PREVIOUS_HOOK.lock().unwrap_or_else(PoisonError::into_inner) = Some(previous);

    panic::set_hook(Box::new(move |info| {
        on_panic(info);
        (*chained)(info);
    }));
}

fn restore_panic_hook()
{
    let previous = PREVIOUS_HOOK.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(previous) = previous {
        drop(panic::take_hook());
        panic::set_hook(Box::new(move |info| (*previous)(info)));
    }
}

fn on_panic(info: &PanicHookInfo<'_>)
{
    let manager = ACTIVE.load(Ordering::Acquire);
    if manager.is_null() || CAPTURE_IN_PROGRESS.swap(true, Ordering::AcqRel) {
        return;
    }
    // SAFETY: ACTIVE only ever holds a `&'static CrashManager`.
    let manager = unsafe { &*manager };

    let mut frames = [0usize; MAX_CAPTURE_DEPTH];
    let count = manager.capture_frames(&mut frames);
    manager.record_captured(&FailureIdentity::from_panic(info), &frames[..count]);

    CAPTURE_IN_PROGRESS.store(false, Ordering::Release);
}

#[cfg(unix)]
fn install_signal_handlers() -> CrashResult<()>
{
    for (installed, signal) in FatalSignal::ALL.into_iter().enumerate() {
        if let Err(err) = install_signal_handler(signal) {
            for &signal in &FatalSignal::ALL[..installed] {
                let _ = restore_signal_handler(signal);
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers() -> CrashResult<()>
{
    Ok(())
}

#[cfg(unix)]
fn install_signal_handler(signal: FatalSignal) -> CrashResult<()>
{
    let flags = if signal.may_be_stack_overflow() {
        libc::SA_SIGINFO | libc::SA_ONSTACK
    } else {
        libc::SA_SIGINFO
    };

    // SAFETY: `action` is fully initialized before use, and the saved slot
    // for `signal` is a valid out-pointer owned by this module.
    let ret = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_flags = flags;
        libc::sigfillset(ptr::addr_of_mut!(action.sa_mask));
        action.sa_sigaction = on_fatal_signal as extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) as usize;
        libc::sigaction(signal.raw(), ptr::addr_of!(action), saved_action(signal))
    };
    if ret != 0 {
        return Err(signal_error(signal));
    }
    Ok(())
}

#[cfg(unix)]
fn restore_signal_handler(signal: FatalSignal) -> CrashResult<()>
{
    // SAFETY: the slot was filled by the `sigaction` call that installed our
    // handler for `signal`.
    let ret = unsafe { libc::sigaction(signal.raw(), saved_action(signal), ptr::null_mut()) };
    if ret != 0 {
        return Err(signal_error(signal));
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_signal_handler(_signal: FatalSignal) -> CrashResult<()>
{
    Ok(())
}

/// Map a guarded [`ALT_STACK_SIZE`] stack and register it for this thread.
///
/// Failure is logged and leaves whatever stack was registered before; the
/// signal path then skips reports that would not fit.
#[cfg(unix)]
fn install_alt_stack()
{
    let mut slot = ALT_STACK.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return;
    }

    // SAFETY: sysconf has no preconditions.
    let page = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).unwrap_or(4096);
    let mapping_len = ALT_STACK_SIZE + page;

    // SAFETY: a fresh anonymous private mapping; nothing else refers to it.
    let mapping = unsafe {
        libc::mmap(
            ptr::null_mut(),
            mapping_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if mapping == libc::MAP_FAILED {
        tracing::warn!(
            error = %std::io::Error::last_os_error(),
            "Could not map an alternate signal stack"
        );
        return;
    }

    // SAFETY: `mapping` is a live mapping of `mapping_len` bytes owned here.
    // The lowest page becomes the guard; the stack grows down toward it.
    let registered = unsafe {
        libc::mprotect(mapping, page, libc::PROT_NONE);

        let mut stack: libc::stack_t = std::mem::zeroed();
        stack.ss_sp = mapping.cast::<u8>().add(page).cast();
        stack.ss_size = ALT_STACK_SIZE;
        stack.ss_flags = 0;
        let mut previous: libc::stack_t = std::mem::zeroed();
        if libc::sigaltstack(ptr::addr_of!(stack), ptr::addr_of_mut!(previous)) == 0 {
            Some(previous)
        } else {
            None
        }
    };

    match registered {
        Some(previous) => {
            tracing::debug!(size = ALT_STACK_SIZE, "Registered alternate signal stack");
            *slot = Some(AltStack {
                mapping,
                mapping_len,
                previous,
                // SAFETY: pthread_self has no preconditions.
                thread: unsafe { libc::pthread_self() },
            });
        }
        None => {
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "Could not register an alternate signal stack"
            );
            // SAFETY: the mapping was never registered.
            unsafe { libc::munmap(mapping, mapping_len) };
        }
    }
}

/// Put back the alternate stack [`install_alt_stack`] replaced.
///
/// The registration is per thread: from any thread other than the installing
/// one, the mapping is left in place for the thread still using it.
#[cfg(unix)]
fn restore_alt_stack()
{
    let Some(stack) = ALT_STACK.lock().unwrap_or_else(PoisonError::into_inner).take() else {
        return;
    };

    // SAFETY: pthread_self and pthread_equal have no preconditions.
    let same_thread = unsafe { libc::pthread_equal(libc::pthread_self(), stack.thread) } != 0;
    if !same_thread {
        tracing::debug!("Alternate signal stack left registered on its installing thread");
        return;
    }

    // SAFETY: `previous` came from sigaltstack on this thread, and no handler
    // runs on our mapping outside a signal delivery.
    unsafe {
        if libc::sigaltstack(ptr::addr_of!(stack.previous), ptr::null_mut()) == 0 {
            libc::munmap(stack.mapping, stack.mapping_len);
        }
    }
}

/// `true` when the handler runs on an alternate stack too small to symbolize on.
#[cfg(unix)]
fn on_small_alt_stack() -> bool
{
    // SAFETY: sigaltstack only reads into `current`; async-signal-safe.
    let current = unsafe {
        let mut current: libc::stack_t = std::mem::zeroed();
        if libc::sigaltstack(ptr::null(), ptr::addr_of_mut!(current)) != 0 {
            return false;
        }
        current
    };
    current.ss_flags & libc::SS_ONSTACK != 0 && current.ss_size < MIN_HANDLER_STACK
}

#[cfg(not(unix))]
fn install_alt_stack() {}

#[cfg(not(unix))]
fn restore_alt_stack() {}

#[cfg(unix)]
fn saved_action(signal: FatalSignal) -> *mut libc::sigaction
{
    // SAFETY: `slot()` is always in bounds; this only forms a pointer.
    unsafe { (*SAVED_ACTIONS.0.get())[signal.slot()].as_mut_ptr() }
}

#[cfg(unix)]
fn signal_error(signal: FatalSignal) -> crate::error::CrashError
{
    crate::error::CrashError::SignalInstall {
        signal: signal.raw(),
        name: signal.name(),
        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
}

#[cfg(unix)]
extern "C" fn on_fatal_signal(signum: libc::c_int, info: *mut libc::siginfo_t, _context: *mut libc::c_void)
{
    let Some(signal) = FatalSignal::from_raw(signum) else {
        // SAFETY: signal and raise are async-signal-safe.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
            libc::raise(signum);
        }
        return;
    };

    if !CAPTURE_IN_PROGRESS.swap(true, Ordering::AcqRel) {
        let manager = ACTIVE.load(Ordering::Acquire);
        // A panic hook has already reported this; the abort is the runtime
        // tearing the process down afterward.
        let panic_abort = signal == FatalSignal::Abort && std::thread::panicking();

        if !manager.is_null() && !panic_abort && !on_small_alt_stack() {
            // SAFETY: ACTIVE only ever holds a `&'static CrashManager`.
            let manager = unsafe { &*manager };
            // SAFETY: winning CAPTURE_IN_PROGRESS grants exclusive use.
            let frames = unsafe { &mut *FRAME_BUFFER.0.get() };

            let identity = FailureIdentity::Signal {
                signal,
                fault_address: fault_address(signal, info),
            };
            let count = manager.capture_frames(frames);
            manager.record_captured(&identity, &frames[..count]);
        }
    }

    // SAFETY: restoring the saved action and raising are async-signal-safe.
    // The signal stays blocked until this handler returns, then the restored
    // action handles it.
    unsafe {
        libc::sigaction(signum, saved_action(signal), ptr::null_mut());
        libc::raise(signum);
    }
}

#[cfg(unix)]
fn fault_address(signal: FatalSignal, info: *const libc::siginfo_t) -> Option<crate::types::Address>
{
    if info.is_null() || !signal.reports_fault_address() {
        return None;
    }

    // SAFETY: the kernel passes a valid siginfo_t to SA_SIGINFO handlers.
    // On Linux si_addr is a union accessor, elsewhere a plain field.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let address = unsafe {
        // User-sent signals (si_code <= 0) carry a pid, not an address.
        if (*info).si_code <= 0 {
            return None;
        }
        (*info).si_addr()
    };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let address = unsafe { (*info).si_addr };

    Some(crate::types::Address::from(address as usize))
}
