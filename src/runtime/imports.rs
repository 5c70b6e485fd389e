//! Host import registration
//!
//! An [`ImportObject`] maps (namespace, name) pairs to host functions with
//! declared signatures. It is populated before instantiation, consumed
//! read-only by it, and can be reused across any number of instantiations.
//!
//! A [`HostFunction`] couples a signature with a closure. State the C-shaped
//! original passed as a registration-time data pointer is simply captured by
//! the closure here; the engine supplies the [`InstanceContext`] at call
//! time, scoped to that single invocation.

use crate::decode::module::FuncType;
use crate::error::{self, ContractViolation, Error, Trap};
use crate::runtime::context::InstanceContext;
use crate::values::{Value, ValueKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type HostFn =
    dyn Fn(&mut InstanceContext<'_>, &[Value]) -> Result<Vec<Value>, Trap> + Send + Sync;

/// A host-provided function with its declared signature
#[derive(Clone)]
pub struct HostFunction {
    ty: FuncType,
    func: Arc<HostFn>,
}

impl HostFunction {
    /// Wrap a closure with its declared parameter and result kinds.
    ///
    /// The closure receives a fresh [`InstanceContext`] on every invocation,
    /// giving it access to the calling instance's memories, tables and
    /// globals for the duration of that call only.
    pub fn new<F>(params: Vec<ValueKind>, results: Vec<ValueKind>, func: F) -> HostFunction
    where
        F: Fn(&mut InstanceContext<'_>, &[Value]) -> Result<Vec<Value>, Trap>
            + Send
            + Sync
            + 'static,
    {
        HostFunction {
            ty: FuncType::new(params, results),
            func: Arc::new(func),
        }
    }

    /// The declared signature, matched exactly at link time
    pub fn ty(&self) -> &FuncType {
        &self.ty
    }

    pub(crate) fn call(
        &self,
        ctx: &mut InstanceContext<'_>,
        args: &[Value],
    ) -> Result<Vec<Value>, Trap> {
        (self.func)(ctx, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction").field("ty", &self.ty).finish()
    }
}

/// Registry of host functions keyed by (namespace, name)
#[derive(Debug, Clone, Default)]
pub struct ImportObject {
    entries: HashMap<(String, String), HostFunction>,
}

impl ImportObject {
    /// Create a new empty import object
    pub fn new() -> ImportObject {
        ImportObject {
            entries: HashMap::new(),
        }
    }

    /// Register `function` under (namespace, name).
    ///
    /// Each (namespace, name) pair may be registered once; a duplicate
    /// registration fails and leaves the existing entry in place.
    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        function: HostFunction,
    ) -> Result<(), Error> {
        let key = (namespace.into(), name.into());
        let result = if self.entries.contains_key(&key) {
            Err(ContractViolation::DuplicateImport {
                namespace: key.0.clone(),
                name: key.1.clone(),
            }
            .into())
        } else {
            log::trace!("registered import {}.{} {}", key.0, key.1, function.ty());
            self.entries.insert(key, function);
            Ok(())
        };
        error::report(result)
    }

    /// Look up a registered function
    pub fn resolve(&self, namespace: &str, name: &str) -> Option<&HostFunction> {
        self.entries
            .get(&(namespace.to_string(), name.to_string()))
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop() -> HostFunction {
        HostFunction::new(vec![], vec![], |_, _| Ok(vec![]))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut imports = ImportObject::new();
        assert!(imports.is_empty());

        imports.register("env", "tick", nop()).unwrap();
        imports
            .register(
                "env",
                "add_one",
                HostFunction::new(vec![ValueKind::I32], vec![ValueKind::I32], |_, args| {
                    let n = args[0].as_i32().unwrap();
                    Ok(vec![Value::I32(n + 1)])
                }),
            )
            .unwrap();

        assert_eq!(imports.len(), 2);
        assert!(imports.resolve("env", "tick").is_some());
        assert!(imports.resolve("env", "add_one").is_some());
        assert!(imports.resolve("env", "missing").is_none());
        assert!(imports.resolve("other", "tick").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut imports = ImportObject::new();
        imports.register("env", "tick", nop()).unwrap();
        assert!(imports.register("env", "tick", nop()).is_err());
        assert_eq!(imports.len(), 1);
    }

    #[test]
    fn test_signature_is_preserved() {
        let mut imports = ImportObject::new();
        imports
            .register(
                "math",
                "hypot",
                HostFunction::new(
                    vec![ValueKind::F64, ValueKind::F64],
                    vec![ValueKind::F64],
                    |_, _| Ok(vec![Value::F64(0.0)]),
                ),
            )
            .unwrap();

        let ty = imports.resolve("math", "hypot").unwrap().ty();
        assert_eq!(ty.params, vec![ValueKind::F64, ValueKind::F64]);
        assert_eq!(ty.results, vec![ValueKind::F64]);
    }

    #[test]
    fn test_reuse_is_cheap() {
        // Cloning shares the underlying closures
        let mut imports = ImportObject::new();
        imports.register("env", "tick", nop()).unwrap();
        let copy = imports.clone();
        assert_eq!(copy.len(), 1);
    }
}
