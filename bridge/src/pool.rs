//! Guest instances and the checkout pool.
//!
//! A guest instance is single-threaded and not re-entrant: its linear
//! memory would be corrupted by concurrent invocations. The pool enforces
//! the one-request-per-instance rule by handing out exclusive ownership;
//! a request checks an instance out, drives both handler calls on it, and
//! checks it back in. Trapped instances are never returned — the
//! middleware ejects them and instantiates replacements.

use std::sync::Mutex;

use tokio::sync::Semaphore;
use wasmtime::{Store, TypedFunc};

use crate::error::BridgeError;
use crate::state::HostState;

/// One instantiated guest with its store and resolved entry points.
pub struct GuestInstance {
    store: Store<HostState>,
    handle_request: TypedFunc<(), i64>,
    handle_response: TypedFunc<(i32, i32), ()>,
    deadline_ticks: u64,
    trapped: bool,
}

impl GuestInstance {
    pub fn new(
        store: Store<HostState>,
        handle_request: TypedFunc<(), i64>,
        handle_response: TypedFunc<(i32, i32), ()>,
        deadline_ticks: u64,
    ) -> GuestInstance {
        GuestInstance {
            store,
            handle_request,
            handle_response,
            deadline_ticks,
            trapped: false,
        }
    }

    pub fn state(&self) -> &HostState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut HostState {
        self.store.data_mut()
    }

    /// True once a call on this instance trapped; the instance must not be
    /// reused.
    pub fn is_trapped(&self) -> bool {
        self.trapped
    }

    /// Invoke the guest's `handle_request`, returning the raw `ctx_next`.
    pub fn call_handle_request(&mut self) -> Result<i64, BridgeError> {
        self.store.set_epoch_deadline(self.deadline_ticks);
        self.handle_request
            .call(&mut self.store, ())
            .map_err(|err| self.mark_trapped(err))
    }

    /// Invoke the guest's `handle_response` with the preserved context
    /// value and the downstream error flag.
    pub fn call_handle_response(&mut self, ctx: u32, is_error: bool) -> Result<(), BridgeError> {
        self.store.set_epoch_deadline(self.deadline_ticks);
        self.handle_response
            .call(&mut self.store, (ctx as i32, is_error as i32))
            .map_err(|err| self.mark_trapped(err))
    }

    fn mark_trapped(&mut self, err: anyhow::Error) -> BridgeError {
        self.trapped = true;
        BridgeError::from_guest_call(err)
    }
}

/// Fixed-capacity pool of guest instances with async checkout.
///
/// Capacity is tracked by a semaphore whose permits mirror the slot list;
/// `checkout` waits until an instance is available. An ejected instance
/// that cannot be replaced permanently shrinks the pool.
pub struct InstancePool {
    slots: Mutex<Vec<GuestInstance>>,
    permits: Semaphore,
}

impl InstancePool {
    pub fn new() -> InstancePool {
        InstancePool {
            slots: Mutex::new(Vec::new()),
            permits: Semaphore::new(0),
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<GuestInstance>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an instance (initial fill or trap replacement).
    pub fn checkin(&self, instance: GuestInstance) {
        self.lock_slots().push(instance);
        self.permits.add_permits(1);
    }

    /// Take exclusive ownership of an instance, waiting if none is free.
    pub async fn checkout(&self) -> Result<GuestInstance, BridgeError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BridgeError::Wasmtime(anyhow::anyhow!("instance pool closed")))?;
        permit.forget();
        self.lock_slots()
            .pop()
            .ok_or_else(|| BridgeError::Wasmtime(anyhow::anyhow!("instance pool out of sync")))
    }

    /// Instances currently checked in.
    pub fn available(&self) -> usize {
        self.lock_slots().len()
    }
}

impl Default for InstancePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wasmtime::{Engine, Linker, Module, StoreLimitsBuilder};
    use wasmtime_wasi::WasiCtxBuilder;

    use http_wasm_abi::NopLogger;

    const MINIMAL: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "handle_request") (result i64) i64.const 1)
            (func (export "handle_response") (param i32 i32))
        )
    "#;

    fn test_instance(engine: &Engine, module: &Module) -> GuestInstance {
        let state = HostState::new(
            WasiCtxBuilder::new().build_p1(),
            StoreLimitsBuilder::new().build(),
            Arc::new(Vec::new()),
            Arc::new(NopLogger),
        );
        let mut store = Store::new(engine, state);
        store.set_epoch_deadline(u64::MAX);
        let linker = Linker::new(engine);
        let instance = linker.instantiate(&mut store, module).unwrap();
        let handle_request = instance
            .get_typed_func::<(), i64>(&mut store, "handle_request")
            .unwrap();
        let handle_response = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, "handle_response")
            .unwrap();
        GuestInstance::new(store, handle_request, handle_response, u64::MAX)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checkout_and_checkin() {
        let engine = Engine::default();
        let module = Module::new(&engine, MINIMAL).unwrap();
        let pool = InstancePool::new();
        pool.checkin(test_instance(&engine, &module));
        assert_eq!(pool.available(), 1);

        let mut inst = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(inst.call_handle_request().unwrap(), 1);
        assert!(!inst.is_trapped());

        pool.checkin(inst);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checkout_waits_for_checkin() {
        let engine = Engine::default();
        let module = Module::new(&engine, MINIMAL).unwrap();
        let pool = Arc::new(InstancePool::new());
        pool.checkin(test_instance(&engine, &module));

        let inst = pool.checkout().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.checkout().await.map(|_| ()) })
        };
        // The waiter cannot complete until the instance comes back.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        pool.checkin(inst);
        waiter.await.unwrap().unwrap();
    }
}
