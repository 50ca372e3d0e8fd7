//! Middleware factory — Wasmtime engine, module loading, and guest
//! instantiation.
//!
//! `WasmMiddleware` is the main entry point. It compiles and validates a
//! guest module, instantiates the configured number of pooled instances,
//! runs each guest's one-shot init, and freezes the negotiated feature
//! mask. Request handling lives in `middleware.rs`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimitsBuilder};
use wasmtime_wasi::preview1;
use wasmtime_wasi::WasiCtxBuilder;

use http_wasm_abi::{
    Features, GuestLogger, EXPORT_HANDLE_REQUEST, EXPORT_HANDLE_RESPONSE, EXPORT_INITIALIZE,
    EXPORT_MEMORY, EXPORT_START,
};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::linker::register_host_functions;
use crate::logger::TracingLogger;
use crate::pool::{GuestInstance, InstancePool};
use crate::state::HostState;
use crate::validation::validate_module;

/// Epoch tick interval for the deadline watchdog.
const EPOCH_TICK: Duration = Duration::from_millis(1);

/// Everything needed to stamp out guest instances: shared engine and
/// compiled module, plus per-instance configuration. Replacement instances
/// for ejected ones come from here too.
pub(crate) struct GuestFactory {
    engine: Engine,
    module: Module,
    config: BridgeConfig,
    guest_config: Arc<Vec<u8>>,
    logger: Arc<dyn GuestLogger>,
    deadline_ticks: u64,
}

impl GuestFactory {
    /// Build, link, and initialize one guest instance.
    pub(crate) fn instantiate(&self) -> Result<GuestInstance, BridgeError> {
        let mut builder = WasiCtxBuilder::new();
        if self.config.wasi.inherit_stdout {
            builder.inherit_stdout();
        }
        if self.config.wasi.inherit_stderr {
            builder.inherit_stderr();
        }
        builder.args(&self.config.wasi.args);
        builder.envs(&self.config.wasi.env);
        let wasi = builder.build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory_bytes)
            .build();
        let state = HostState::new(
            wasi,
            limits,
            Arc::clone(&self.guest_config),
            Arc::clone(&self.logger),
        );

        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.limits);
        store.set_epoch_deadline(self.deadline_ticks);

        let mut linker = Linker::new(&self.engine);
        preview1::add_to_linker_sync(&mut linker, |s: &mut HostState| &mut s.wasi)?;
        register_host_functions(&mut linker)?;

        let instance = linker.instantiate(&mut store, &self.module)?;
        if instance.get_memory(&mut store, EXPORT_MEMORY).is_none() {
            return Err(BridgeError::Validation("no memory export".into()));
        }

        run_init(&mut store, &instance)?;

        let handle_request =
            instance.get_typed_func::<(), i64>(&mut store, EXPORT_HANDLE_REQUEST)?;
        let handle_response =
            instance.get_typed_func::<(i32, i32), ()>(&mut store, EXPORT_HANDLE_RESPONSE)?;

        Ok(GuestInstance::new(
            store,
            handle_request,
            handle_response,
            self.deadline_ticks,
        ))
    }

    /// Refill a pool slot after an instance was ejected.
    pub(crate) fn replace_into(&self, pool: &InstancePool) {
        match self.instantiate() {
            Ok(fresh) => pool.checkin(fresh),
            Err(err) => tracing::error!(
                error = %err,
                "failed to replace trapped guest instance; pool capacity reduced"
            ),
        }
    }
}

/// The http-wasm middleware: one compiled guest exposed as a request
/// handler.
///
/// Create once per guest module; the instance pool inside serializes guest
/// invocations while the surrounding server handles requests concurrently.
pub struct WasmMiddleware {
    pub(crate) factory: Arc<GuestFactory>,
    /// Feature mask negotiated during guest init. Fixed after construction.
    pub(crate) features: Features,
    pub(crate) pool: Arc<InstancePool>,
}

impl std::fmt::Debug for WasmMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmMiddleware").finish_non_exhaustive()
    }
}

impl WasmMiddleware {
    /// Create a middleware from WASM bytes (or WAT, in tests).
    pub fn new(wasm: impl AsRef<[u8]>, config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        Self::with_logger(wasm, config, Arc::new(TracingLogger))
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(
        path: impl AsRef<Path>,
        config: BridgeConfig,
    ) -> Result<Arc<Self>, BridgeError> {
        let wasm = std::fs::read(path.as_ref())
            .map_err(|e| BridgeError::Validation(format!("read {:?}: {}", path.as_ref(), e)))?;
        Self::new(wasm, config)
    }

    /// Create a middleware with a custom guest log sink.
    pub fn with_logger(
        wasm: impl AsRef<[u8]>,
        config: BridgeConfig,
        logger: Arc<dyn GuestLogger>,
    ) -> Result<Arc<Self>, BridgeError> {
        let engine = create_engine()?;
        let module = Module::new(&engine, wasm.as_ref())?;
        validate_module(&module)?;

        let deadline_ticks = timeout_to_epoch_deadline(config.invocation_timeout);
        let guest_config = Arc::new(config.guest_config.clone());
        let pool_size = config.pool_size.max(1);
        let factory = Arc::new(GuestFactory {
            engine,
            module,
            config,
            guest_config,
            logger,
            deadline_ticks,
        });

        // Instantiate the pool; the first instance's init fixes the
        // middleware feature mask (all instances run the same init).
        let pool = Arc::new(InstancePool::new());
        let mut features = Features::NONE;
        for slot in 0..pool_size {
            let instance = factory.instantiate()?;
            if slot == 0 {
                features = instance.state().instance_features;
            }
            pool.checkin(instance);
        }
        tracing::debug!(%features, pool_size, "wasm middleware initialized");

        Ok(Arc::new(WasmMiddleware {
            factory,
            features,
            pool,
        }))
    }

    /// The feature mask negotiated at init time.
    pub fn features(&self) -> Features {
        self.features
    }
}

/// Run the guest's one-shot init entry point, if any.
///
/// `_start` follows WASI command semantics: an `exit(0)` surfaces as a
/// trap carrying `I32Exit(0)` and counts as success.
fn run_init(store: &mut Store<HostState>, instance: &wasmtime::Instance) -> Result<(), BridgeError> {
    if let Some(start) = instance.get_func(&mut *store, EXPORT_START) {
        let start = start
            .typed::<(), ()>(&mut *store)
            .map_err(|e| BridgeError::Validation(format!("_start: {e}")))?;
        return match start.call(&mut *store, ()) {
            Ok(()) => Ok(()),
            Err(err) => match err.downcast_ref::<wasmtime_wasi::I32Exit>() {
                Some(wasmtime_wasi::I32Exit(0)) => Ok(()),
                Some(wasmtime_wasi::I32Exit(code)) => {
                    Err(BridgeError::Init(format!("_start exited with code {code}")))
                }
                None => Err(BridgeError::Init(format!("_start trapped: {err:#}"))),
            },
        };
    }

    if let Some(init) = instance.get_func(&mut *store, EXPORT_INITIALIZE) {
        let init = init
            .typed::<(), ()>(&mut *store)
            .map_err(|e| BridgeError::Validation(format!("_initialize: {e}")))?;
        init.call(&mut *store, ())
            .map_err(|err| BridgeError::Init(format!("_initialize trapped: {err:#}")))?;
    }

    Ok(())
}

/// Create a Wasmtime engine with the deadline watchdog armed.
///
/// A detached ticker thread increments the epoch every `EPOCH_TICK`; each
/// guest call sets its deadline in ticks before entering the guest.
fn create_engine() -> Result<Engine, BridgeError> {
    let mut config = Config::new();
    config.epoch_interruption(true);
    config.wasm_threads(false);

    let engine = Engine::new(&config)?;

    let ticker = engine.clone();
    std::thread::Builder::new()
        .name("http-wasm-epoch".to_string())
        .spawn(move || loop {
            std::thread::sleep(EPOCH_TICK);
            ticker.increment_epoch();
        })
        .map_err(|e| BridgeError::Validation(format!("spawn epoch ticker: {e}")))?;

    Ok(engine)
}

/// Convert a wall-clock timeout into an epoch tick budget.
fn timeout_to_epoch_deadline(timeout: Duration) -> u64 {
    let timeout_ms = timeout.as_millis();
    let tick_ms = EPOCH_TICK.as_millis().max(1);
    let ticks = timeout_ms.div_ceil(tick_ms).max(1);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}
