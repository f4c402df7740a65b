//! Lifetime glue between host handles and Lua values.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::Arc;

use mlua::{Lua, Table, Value as LuaValue};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use super::interpreter::{Interpreter, WeakInterpreter};

/// Registry name of the weak-valued table backing [`WeakObject`] slots.
pub(crate) const WEAK_OBJECTS_KEY: &str = "lunar.weak_objects";

/// The process-wide exclusive execution lock of an interpreter.
///
/// Held for the entire duration of any touch of a Lua value, including
/// releasing a handle. Reentrant, since Lua calls back into host code that
/// touches Lua again.
#[derive(Clone, Default)]
pub struct ExecutionLock(Arc<ReentrantMutex<()>>);

impl ExecutionLock {
    pub fn acquire(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.lock()
    }
}

impl std::fmt::Debug for ExecutionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLock")
            .field("locked", &self.0.is_locked())
            .finish()
    }
}

/// An owning handle to a Lua value that is only ever released under the
/// execution lock. Move-only.
pub struct Foreign<T> {
    value: ManuallyDrop<T>,
    lock: ExecutionLock,
}

impl<T> Foreign<T> {
    /// Wrap a handle. The caller must hold `lock`.
    pub fn new(value: T, lock: ExecutionLock) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            lock,
        }
    }
}

impl<T> Deref for Foreign<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for Foreign<T> {
    fn drop(&mut self) {
        let _guard = self.lock.acquire();
        // SAFETY: `value` is never used again after this point.
        unsafe { ManuallyDrop::drop(&mut self.value) }
    }
}

/// A non-owning reference to a Lua table.
///
/// The table lives in a slot of a weak-valued registry table, so holding a
/// `WeakObject` does not keep it alive. Once Lua collects the table the
/// reference resolves to `None`.
pub struct WeakObject {
    slot: i64,
    interp: WeakInterpreter,
}

impl WeakObject {
    /// Create a weak reference. Must be called under the execution lock.
    pub(crate) fn new(interp: &Interpreter, object: &Table) -> mlua::Result<Self> {
        let slot = interp.next_slot();
        let slots: Table = interp.lua().named_registry_value(WEAK_OBJECTS_KEY)?;
        slots.raw_set(slot, object.clone())?;
        Ok(Self {
            slot,
            interp: interp.downgrade(),
        })
    }

    /// Resolve the reference. Must be called under the execution lock.
    pub(crate) fn get(&self, lua: &Lua) -> mlua::Result<Option<Table>> {
        let slots: Table = lua.named_registry_value(WEAK_OBJECTS_KEY)?;
        slots.raw_get(self.slot)
    }

    pub(crate) fn interpreter(&self) -> &WeakInterpreter {
        &self.interp
    }
}

impl Drop for WeakObject {
    fn drop(&mut self) {
        let Some(interp) = self.interp.upgrade() else {
            return;
        };
        let _guard = interp.lock();
        if let Ok(slots) = interp.lua().named_registry_value::<Table>(WEAK_OBJECTS_KEY) {
            let _ = slots.raw_set(self.slot, LuaValue::Nil);
        }
    }
}

/// Create the weak slot table. Called once per interpreter.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    let slots = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__mode", "v")?;
    super::interpreter::set_metatable(lua, &slots, &meta)?;
    lua.set_named_registry_value(WEAK_OBJECTS_KEY, slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Probe(Arc<AtomicBool>, ExecutionLock, Arc<AtomicBool>);

    impl Drop for Probe {
        fn drop(&mut self) {
            // Records whether the lock was held while the value was released.
            self.2.store(self.1.0.is_owned_by_current_thread(), Ordering::SeqCst);
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_foreign_releases_under_lock() {
        let lock = ExecutionLock::default();
        let dropped = Arc::new(AtomicBool::new(false));
        let held = Arc::new(AtomicBool::new(false));

        let foreign = Foreign::new(
            Probe(dropped.clone(), lock.clone(), held.clone()),
            lock.clone(),
        );
        drop(foreign);

        assert!(dropped.load(Ordering::SeqCst));
        assert!(held.load(Ordering::SeqCst));
    }

    #[test]
    fn test_foreign_drop_waits_for_lock() {
        let lock = ExecutionLock::default();
        let dropped = Arc::new(AtomicBool::new(false));
        let held = Arc::new(AtomicBool::new(false));
        let foreign = Foreign::new(
            Probe(dropped.clone(), lock.clone(), held.clone()),
            lock.clone(),
        );

        let guard = lock.acquire();
        let handle = thread::spawn(move || drop(foreign));
        thread::sleep(Duration::from_millis(50));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(guard);
        handle.join().unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }
}
