//! Class initialization protocol.
//!
//! Each class carries a mutex-guarded [`InitState`] and a condition variable.
//! The first thread to find a class `Linked` claims it, initializes the
//! superclass, runs `<clinit>` through the [`InitDriver`] and publishes the
//! outcome. Other threads wait; the claiming thread itself re-enters freely.

use crate::runtime_class::{InitState, RuntimeClass, RuntimeMethod};
use core_types::{VmError, VmResult};
use std::sync::Arc;

/// Executes the parts of initialization that need the interpreter.
pub trait InitDriver {
    /// Stores heap-backed `ConstantValue`s (String constants) into statics.
    fn initialize_constants(&mut self, class: &Arc<RuntimeClass>) -> VmResult<()>;

    /// Runs the class's `<clinit>`.
    fn run_initializer(&mut self, class: &Arc<RuntimeClass>, clinit: &Arc<RuntimeMethod>) -> VmResult<()>;

    /// Called before blocking on another thread's initialization, with the
    /// class lock held. The thread must count as parked for collections
    /// until [`end_wait`](Self::end_wait).
    fn begin_wait(&mut self) {}

    /// Called after waking, with the class lock released.
    fn end_wait(&mut self) {}
}

/// Initializes `class` and its superclasses. Idempotent.
pub fn initialize(class: &Arc<RuntimeClass>, driver: &mut dyn InitDriver) -> VmResult<()> {
    let me = std::thread::current().id();
    {
        let mut state = class.init.state.lock();
        loop {
            match &*state {
                InitState::Initialized => return Ok(()),
                InitState::InError(e) => return Err(e.clone()),
                InitState::Initializing(owner) if *owner == me => return Ok(()),
                InitState::Initializing(_) => {
                    driver.begin_wait();
                    class.init.cond.wait(&mut state);
                    parking_lot::MutexGuard::unlocked(&mut state, || driver.end_wait());
                }
                InitState::Unlinked | InitState::Linked => {
                    *state = InitState::Initializing(me);
                    break;
                }
            }
        }
    }

    log::debug!("initializing {}", class.name());
    let outcome = run(class, driver);

    let mut state = class.init.state.lock();
    let result = match outcome {
        Ok(()) => {
            *state = InitState::Initialized;
            Ok(())
        }
        Err(e) => {
            let err = as_initialization_error(class, e);
            log::debug!("initialization of {} failed: {}", class.name(), err);
            *state = InitState::InError(err.clone());
            Err(err)
        }
    };
    class.init.cond.notify_all();
    result
}

fn run(class: &Arc<RuntimeClass>, driver: &mut dyn InitDriver) -> VmResult<()> {
    if !class.is_interface() {
        if let Some(sup) = class.superclass() {
            initialize(sup, driver)?;
        }
    }
    driver.initialize_constants(class)?;
    if let Some(clinit) = class.find_declared_method("<clinit>", "()V") {
        driver.run_initializer(class, clinit)?;
    }
    Ok(())
}

fn as_initialization_error(class: &RuntimeClass, err: VmError) -> VmError {
    match err {
        // Already attributed, or fatal to the thread.
        e @ (VmError::Initialization { .. }
        | VmError::Internal(_)
        | VmError::OutOfMemory(_)
        | VmError::StackOverflow) => e,
        other => VmError::Initialization {
            class: class.name().to_string(),
            message: other.to_string(),
        },
    }
}
