//! Host function registration via Wasmtime linker.
//!
//! Registers the `http_handler` import module. Each function:
//! 1. Extracts memory and `HostState` from the Caller
//! 2. Validates guest pointer/length arguments against linear memory
//! 3. Resolves the in-flight `RequestState` where the call needs one
//! 4. Performs the operation, trapping the guest on any `AbiError`
//!
//! Traps are raised by returning `Err` from the wrapped closure; the host
//! never repairs a guest ABI violation.

use wasmtime::{Caller, Linker, Memory};

use http_wasm_abi::codec::pack_body_result;
use http_wasm_abi::{BodyKind, Features, HeaderKind, LogLevel, HTTP_HANDLER_MODULE};

use crate::error::BridgeError;
use crate::memory;
use crate::state::HostState;

/// Get the guest's exported memory from a Caller.
fn get_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    caller
        .get_export(http_wasm_abi::EXPORT_MEMORY)
        .and_then(|e| e.into_memory())
        .ok_or_else(|| anyhow::anyhow!("guest has no memory export"))
}

/// Register all `http_handler` functions with the linker.
pub fn register_host_functions(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    register_enable_features(linker)?;
    register_get_config(linker)?;
    register_get_method(linker)?;
    register_set_method(linker)?;
    register_get_uri(linker)?;
    register_set_uri(linker)?;
    register_get_protocol_version(linker)?;
    register_get_status_code(linker)?;
    register_set_status_code(linker)?;
    register_get_header_names(linker)?;
    register_get_header_values(linker)?;
    register_set_header_value(linker)?;
    register_add_header_value(linker)?;
    register_remove_header(linker)?;
    register_read_body(linker)?;
    register_write_body(linker)?;
    register_log(linker)?;
    register_log_enabled(linker)?;
    register_get_source_addr(linker)?;
    Ok(())
}

// ── Features & Config ──

fn register_enable_features(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "enable_features",
        |mut caller: Caller<'_, HostState>, want: i32| -> i32 {
            let mask = caller
                .data_mut()
                .enable_features(Features::from_bits(want as u32));
            mask.bits() as i32
        },
    )?;
    Ok(())
}

fn register_get_config(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_config",
        |mut caller: Caller<'_, HostState>, buf: u32, buf_limit: u32| -> anyhow::Result<u32> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            Ok(memory::write_if_fits(
                data,
                buf,
                buf_limit,
                &state.guest_config,
            )?)
        },
    )?;
    Ok(())
}

// ── Method, URI, Protocol ──

fn register_get_method(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_method",
        |mut caller: Caller<'_, HostState>, buf: u32, buf_limit: u32| -> anyhow::Result<u32> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let request = state.request_mut()?;
            let method = request.method.as_str().as_bytes();
            Ok(memory::write_if_fits(data, buf, buf_limit, method)?)
        },
    )?;
    Ok(())
}

fn register_set_method(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "set_method",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let raw = memory::read_bytes(data, ptr, len)?;
            state.request_mut()?.set_method(&raw)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_get_uri(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_uri",
        |mut caller: Caller<'_, HostState>, buf: u32, buf_limit: u32| -> anyhow::Result<u32> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let request = state.request_mut()?;
            let uri = request.uri.as_bytes();
            Ok(memory::write_if_fits(data, buf, buf_limit, uri)?)
        },
    )?;
    Ok(())
}

fn register_set_uri(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "set_uri",
        |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<()> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let raw = memory::read_bytes(data, ptr, len)?;
            state.request_mut()?.set_uri(&raw)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_get_protocol_version(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_protocol_version",
        |mut caller: Caller<'_, HostState>, buf: u32, buf_limit: u32| -> anyhow::Result<u32> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let version = state.request_mut()?.protocol_version();
            Ok(memory::write_if_fits(data, buf, buf_limit, version.as_bytes())?)
        },
    )?;
    Ok(())
}

// ── Status ──

fn register_get_status_code(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_status_code",
        |mut caller: Caller<'_, HostState>| -> anyhow::Result<i32> {
            let request = caller.data_mut().request_mut()?;
            Ok(request.response_status.as_u16() as i32)
        },
    )?;
    Ok(())
}

fn register_set_status_code(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "set_status_code",
        |mut caller: Caller<'_, HostState>, code: i32| -> anyhow::Result<()> {
            caller.data_mut().request_mut()?.set_status(code)?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── Headers ──

fn register_get_header_names(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_header_names",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         buf: u32,
         buf_limit: u32|
         -> anyhow::Result<i64> {
            let kind = HeaderKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let names = state.request_mut()?.header_names(kind)?;
            Ok(memory::write_null_terminated(data, buf, buf_limit, names)?)
        },
    )?;
    Ok(())
}

fn register_get_header_values(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_header_values",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         name_ptr: u32,
         name_len: u32,
         buf: u32,
         buf_limit: u32|
         -> anyhow::Result<i64> {
            let kind = HeaderKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let name = memory::read_bytes(data, name_ptr, name_len)?;
            let values = state.request_mut()?.header_values(kind, &name)?;
            Ok(memory::write_null_terminated(data, buf, buf_limit, values)?)
        },
    )?;
    Ok(())
}

fn register_set_header_value(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "set_header_value",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         name_ptr: u32,
         name_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> anyhow::Result<()> {
            let kind = HeaderKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let name = memory::read_bytes(data, name_ptr, name_len)?;
            let value = memory::read_bytes(data, value_ptr, value_len)?;
            state.request_mut()?.set_header(kind, &name, &value)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_add_header_value(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "add_header_value",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         name_ptr: u32,
         name_len: u32,
         value_ptr: u32,
         value_len: u32|
         -> anyhow::Result<()> {
            let kind = HeaderKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let name = memory::read_bytes(data, name_ptr, name_len)?;
            let value = memory::read_bytes(data, value_ptr, value_len)?;
            state.request_mut()?.add_header(kind, &name, &value)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn register_remove_header(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "remove_header",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         name_ptr: u32,
         name_len: u32|
         -> anyhow::Result<()> {
            let kind = HeaderKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let name = memory::read_bytes(data, name_ptr, name_len)?;
            state.request_mut()?.remove_header(kind, &name)?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── Bodies ──

fn register_read_body(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "read_body",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         buf: u32,
         buf_len: u32|
         -> anyhow::Result<i64> {
            let kind = BodyKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            // The guest's whole destination buffer must be valid before the
            // cursor moves.
            memory::validate_range(data.len(), buf, buf_len)?;
            let (chunk, eof) = state.request_mut()?.read_body(kind, buf_len as usize)?;
            data[buf as usize..buf as usize + chunk.len()].copy_from_slice(&chunk);
            Ok(pack_body_result(eof, chunk.len() as u32))
        },
    )?;
    Ok(())
}

fn register_write_body(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "write_body",
        |mut caller: Caller<'_, HostState>,
         kind: i32,
         buf: u32,
         buf_len: u32|
         -> anyhow::Result<()> {
            let kind = BodyKind::from_i32(kind)?;
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let bytes = memory::read_bytes(data, buf, buf_len)?;
            state.request_mut()?.write_body(kind, &bytes)?;
            Ok(())
        },
    )?;
    Ok(())
}

// ── Logging ──

fn register_log(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "log",
        |mut caller: Caller<'_, HostState>,
         level: i32,
         buf: u32,
         buf_len: u32|
         -> anyhow::Result<()> {
            let level = LogLevel::from_i32(level);
            if level == LogLevel::None {
                return Ok(());
            }
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let message = memory::read_str(data, buf, buf_len, "log message")?;
            state.logger.log(level, &message);
            Ok(())
        },
    )?;
    Ok(())
}

fn register_log_enabled(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "log_enabled",
        |caller: Caller<'_, HostState>, level: i32| -> i32 {
            let level = LogLevel::from_i32(level);
            if level == LogLevel::None {
                return 0;
            }
            caller.data().logger.enabled(level) as i32
        },
    )?;
    Ok(())
}

// ── Source address ──

fn register_get_source_addr(linker: &mut Linker<HostState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        HTTP_HANDLER_MODULE,
        "get_source_addr",
        |mut caller: Caller<'_, HostState>, buf: u32, buf_limit: u32| -> anyhow::Result<u32> {
            let mem = get_memory(&mut caller)?;
            let (data, state) = mem.data_and_store_mut(&mut caller);
            let addr = state.request_mut()?.source_addr_string();
            Ok(memory::write_if_fits(data, buf, buf_limit, addr.as_bytes())?)
        },
    )?;
    Ok(())
}
