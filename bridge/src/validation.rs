//! WASM module validation — handler ABI compatibility checks.
//!
//! Validates that a compiled module meets the http-wasm handler ABI before
//! any instance is created. Checks:
//!
//! 1. `memory` export present
//! 2. `handle_request` / `handle_response` exports with correct signatures
//! 3. At most one of `_start` / `_initialize`, each `() -> ()`
//! 4. Imports only from `http_handler` or a WASI preview1 module

use wasmtime::{ExternType, FuncType, Module, ValType};

use http_wasm_abi::{
    EXPORT_HANDLE_REQUEST, EXPORT_HANDLE_RESPONSE, EXPORT_INITIALIZE, EXPORT_MEMORY, EXPORT_START,
    HTTP_HANDLER_MODULE,
};

use crate::error::BridgeError;

/// Import module name for the WASI preview1 system interface.
const WASI_PREVIEW1_MODULE: &str = "wasi_snapshot_preview1";

/// Validate that a module meets the handler ABI requirements.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn signature_matches(ty: &FuncType, params: &[ValType], results: &[ValType]) -> bool {
    let p: Vec<ValType> = ty.params().collect();
    let r: Vec<ValType> = ty.results().collect();
    p.len() == params.len()
        && p.iter().zip(params).all(|(a, b)| ValType::eq(a, b))
        && r.len() == results.len()
        && r.iter().zip(results).all(|(a, b)| ValType::eq(a, b))
}

/// Find a required function export and check its signature.
fn require_func(
    module: &Module,
    name: &str,
    params: &[ValType],
    results: &[ValType],
) -> Result<(), BridgeError> {
    let export = module
        .exports()
        .find(|e| e.name() == name)
        .ok_or_else(|| BridgeError::Validation(format!("missing required export: {}", name)))?;

    let func_ty = match export.ty() {
        ExternType::Func(ft) => ft,
        _ => {
            return Err(BridgeError::Validation(format!(
                "export '{}' must be a function",
                name
            )));
        }
    };

    if !signature_matches(&func_ty, params, results) {
        return Err(BridgeError::Validation(format!(
            "export '{}' has wrong signature: got {:?}",
            name, func_ty
        )));
    }

    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let memory = module
        .exports()
        .find(|e| e.name() == EXPORT_MEMORY)
        .and_then(|e| match e.ty() {
            ExternType::Memory(mt) => Some(mt),
            _ => None,
        })
        .ok_or_else(|| BridgeError::Validation("module must export 'memory'".into()))?;
    if memory.minimum() < 1 {
        return Err(BridgeError::Validation(
            "'memory' export must be at least one page".into(),
        ));
    }

    require_func(module, EXPORT_HANDLE_REQUEST, &[], &[ValType::I64])?;
    require_func(
        module,
        EXPORT_HANDLE_RESPONSE,
        &[ValType::I32, ValType::I32],
        &[],
    )?;

    let mut init_exports = Vec::new();
    for name in [EXPORT_START, EXPORT_INITIALIZE] {
        if module.exports().any(|e| e.name() == name) {
            require_func(module, name, &[], &[])?;
            init_exports.push(name);
        }
    }
    if init_exports.len() > 1 {
        return Err(BridgeError::Validation(format!(
            "module exports both {} and {}; at most one init entry point is allowed",
            EXPORT_START, EXPORT_INITIALIZE
        )));
    }

    Ok(())
}

/// Check that all imports come from `http_handler` or WASI preview1.
fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();

        if module_name != HTTP_HANDLER_MODULE && module_name != WASI_PREVIEW1_MODULE {
            return Err(BridgeError::Validation(format!(
                "import from unknown module '{}' (only '{}' and '{}' allowed): {}",
                module_name,
                HTTP_HANDLER_MODULE,
                WASI_PREVIEW1_MODULE,
                import.name()
            )));
        }

        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::Validation(format!(
                "non-function import not allowed: {}::{}",
                module_name,
                import.name()
            )));
        }
    }

    Ok(())
}
