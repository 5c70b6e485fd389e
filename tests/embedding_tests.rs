#[cfg(test)]
mod tests {
    use rstest::rstest;
    use skiff::{
        last_error_length, last_error_message, Error, HostFunction, ImportObject, Instance,
        Limits, LinkError, Memory, Mutability, ResourceLimitError, Table, Trap, Value, ValueKind,
        Global,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn module(source: &str) -> Vec<u8> {
        wat::parse_str(source).unwrap()
    }

    fn instantiate(source: &str) -> Instance {
        Instance::instantiate(&module(source), &ImportObject::new()).unwrap()
    }

    fn last_error_string() -> String {
        let mut buf = vec![0u8; last_error_length()];
        let written = last_error_message(&mut buf);
        assert!(written >= 0, "expected a recorded error");
        String::from_utf8(buf).unwrap()
    }

    // End-to-end: instantiate a module exporting add and call it.
    #[test]
    fn test_add_end_to_end() {
        let mut instance = instantiate(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        );
        let results = instance.call("add", &[Value::I32(2), Value::I32(3)]).unwrap();
        assert_eq!(results, vec![Value::I32(5)]);
    }

    // End-to-end: memory with limits {min:1, max:2} grows once, then refuses.
    #[test]
    fn test_memory_growth_limits_end_to_end() {
        let mut instance = instantiate(r#"(module (memory (export "mem") 1 2))"#);

        let mem = instance.memory_mut(0).unwrap();
        assert_eq!(mem.grow(1).unwrap(), 1);
        assert_eq!(mem.size(), 2);

        let err = mem.grow(1).unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceLimit(ResourceLimitError::MemoryMaxExceeded { .. })
        ));
        assert_eq!(mem.size(), 2);
        assert!(last_error_string().contains("resource limit"));
    }

    // End-to-end: bytes that fail validation yield a decode diagnostic.
    #[test]
    fn test_invalid_bytes_end_to_end() {
        let bytes = b"\x00asm\xFF\xFF\xFF\xFF";
        assert!(!skiff::validate(bytes));

        let err = Instance::instantiate(bytes, &ImportObject::new()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let message = last_error_string();
        assert!(message.contains("decode error"), "got: {message}");
    }

    #[test]
    fn test_validate_never_raises() {
        assert!(!skiff::validate(&[]));
        assert!(!skiff::validate(b"\x00asm"));
        assert!(skiff::validate(&module("(module)")));
    }

    // Signature fidelity: wrong parameter kinds fail with a reported error
    // and produce no results.
    #[test]
    fn test_call_signature_fidelity() {
        let mut instance = instantiate(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        );

        // Wrong kind
        let err = instance
            .call("add", &[Value::I32(2), Value::F64(3.0)])
            .unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
        assert!(last_error_string().contains("parameter 1 expects i32"));

        // Wrong arity
        let err = instance.call("add", &[Value::I32(2)]).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));

        // Unknown export
        let err = instance.call("sub", &[]).unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
        assert!(last_error_string().contains("unknown export 'sub'"));

        // The instance stays usable after boundary errors
        let results = instance.call("add", &[Value::I32(1), Value::I32(1)]).unwrap();
        assert_eq!(results, vec![Value::I32(2)]);
    }

    #[rstest]
    #[case(Limits { min: 1, max: Some(2) }, 1, true)]
    #[case(Limits { min: 1, max: Some(2) }, 2, false)]
    #[case(Limits { min: 0, max: Some(4) }, 4, true)]
    #[case(Limits { min: 2, max: None }, 6, true)]
    fn test_memory_growth_monotonicity(
        #[case] limits: Limits,
        #[case] delta: u32,
        #[case] expect_ok: bool,
    ) {
        let mut memory = Memory::new(limits).unwrap();
        let before = memory.size();
        let result = memory.grow(delta);
        if expect_ok {
            assert_eq!(result.unwrap(), before);
            assert_eq!(memory.size(), before + delta);
        } else {
            assert!(result.is_err());
            assert_eq!(memory.size(), before);
        }
    }

    #[rstest]
    #[case(Limits { min: 2, max: Some(3) }, 1, true)]
    #[case(Limits { min: 2, max: Some(3) }, 2, false)]
    fn test_table_growth_monotonicity(
        #[case] limits: Limits,
        #[case] delta: u32,
        #[case] expect_ok: bool,
    ) {
        let mut table = Table::new(limits).unwrap();
        let before = table.size();
        let result = table.grow(delta);
        if expect_ok {
            assert_eq!(result.unwrap(), before);
            assert_eq!(table.size(), before + delta);
        } else {
            assert!(result.is_err());
            assert_eq!(table.size(), before);
        }
    }

    // Round-trip Global: set-then-get observes the value for matching kinds;
    // immutable globals never change observably.
    #[test]
    fn test_global_round_trip() {
        let mut g = Global::new(Value::I64(0), Mutability::Var);
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            g.set(Value::I64(v)).unwrap();
            assert_eq!(g.get(), Value::I64(v));
        }

        let mut frozen = Global::new(Value::I32(11), Mutability::Const);
        assert!(frozen.set(Value::I32(12)).is_err());
        assert_eq!(frozen.get(), Value::I32(11));
        assert!(last_error_string().contains("immutable"));

        let descriptor = frozen.descriptor();
        assert_eq!(descriptor.kind, ValueKind::I32);
        assert!(!descriptor.mutable);
    }

    // Error channel accuracy: a failure is immediately readable; reads are
    // non-destructive; a success never clears the previous message.
    #[test]
    fn test_error_channel_accuracy() {
        let mut instance = instantiate(
            r#"(module (func (export "ok") (result i32) i32.const 1))"#,
        );

        let err = instance.call("nope", &[]).unwrap_err();
        assert!(last_error_length() > 0);
        let first = last_error_string();
        assert_eq!(first, format!("{err}"));

        // A successful call leaves the channel untouched (documented policy:
        // stale reads return the previous failure).
        instance.call("ok", &[]).unwrap();
        assert_eq!(last_error_string(), first);

        // The next failure overwrites rather than appends
        instance.call("also_missing", &[]).unwrap_err();
        let second = last_error_string();
        assert!(second.contains("also_missing"));
        assert!(!second.contains("nope"));
    }

    #[test]
    fn test_error_message_buffer_too_small() {
        let mut instance = instantiate("(module)");
        instance.call("missing", &[]).unwrap_err();

        let needed = last_error_length();
        assert!(needed > 0);
        let mut short = vec![0u8; needed - 1];
        assert_eq!(last_error_message(&mut short), -1);

        let mut exact = vec![0u8; needed];
        assert_eq!(last_error_message(&mut exact) as usize, needed);
    }

    // Host import bridging: the callback sees registration-time state and a
    // per-call InstanceContext into the caller's memory.
    #[test]
    fn test_host_import_with_context() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_host = Arc::clone(&calls);

        let mut imports = ImportObject::new();
        imports
            .register(
                "env",
                "slot_plus_count",
                HostFunction::new(vec![], vec![ValueKind::I32], move |ctx, _args| {
                    let count = calls_in_host.fetch_add(1, Ordering::SeqCst) + 1;
                    let mem = ctx.memory(0).ok_or_else(|| Trap::host("no memory"))?;
                    let slot = mem.read_u32(0).map_err(|_| Trap::host("bad slot"))?;
                    Ok(vec![Value::I32((slot + count) as i32)])
                }),
            )
            .unwrap();

        let mut instance = Instance::instantiate(
            &module(
                r#"(module
                    (import "env" "slot_plus_count" (func $f (result i32)))
                    (memory (export "mem") 1)
                    (func (export "fetch") (result i32) call $f))"#,
            ),
            &imports,
        )
        .unwrap();

        instance.memory_mut(0).unwrap().write_u32(0, 40).unwrap();
        assert_eq!(instance.call("fetch", &[]).unwrap(), vec![Value::I32(41)]);
        assert_eq!(instance.call("fetch", &[]).unwrap(), vec![Value::I32(42)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // A host callback can write guest memory through the context.
    #[test]
    fn test_host_import_writes_memory() {
        let mut imports = ImportObject::new();
        imports
            .register(
                "env",
                "stamp",
                HostFunction::new(vec![ValueKind::I32], vec![], |ctx, args| {
                    let addr = args[0].as_i32().unwrap() as u32;
                    let mem = ctx.memory_mut(0).ok_or_else(|| Trap::host("no memory"))?;
                    mem.write_u32(u64::from(addr), 0xABCD)
                        .map_err(|_| Trap::host("out of bounds"))?;
                    Ok(vec![])
                }),
            )
            .unwrap();

        let mut instance = Instance::instantiate(
            &module(
                r#"(module
                    (import "env" "stamp" (func $stamp (param i32)))
                    (memory (export "mem") 1)
                    (func (export "go") i32.const 16 call $stamp))"#,
            ),
            &imports,
        )
        .unwrap();

        instance.call("go", &[]).unwrap();
        assert_eq!(instance.memory(0).unwrap().read_u32(16).unwrap(), 0xABCD);
    }

    // A trapping host function aborts the in-flight call with its message.
    #[test]
    fn test_host_trap_propagates() {
        let mut imports = ImportObject::new();
        imports
            .register(
                "env",
                "fail",
                HostFunction::new(vec![], vec![], |_, _| Err(Trap::host("backend offline"))),
            )
            .unwrap();

        let mut instance = Instance::instantiate(
            &module(
                r#"(module
                    (import "env" "fail" (func $fail))
                    (func (export "go") call $fail))"#,
            ),
            &imports,
        )
        .unwrap();

        let err = instance.call("go", &[]).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Host(_))));
        assert!(last_error_string().contains("backend offline"));
    }

    // A trap aborts only the call; earlier effects on instance state persist.
    #[test]
    fn test_trap_leaves_state_as_executed() {
        let mut instance = instantiate(
            r#"(module
                (memory (export "mem") 1)
                (func (export "poke_then_trap")
                    i32.const 0
                    i32.const 7
                    i32.store
                    unreachable))"#,
        );

        let err = instance.call("poke_then_trap", &[]).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Unreachable)));

        // No rollback: the store before the trap is visible
        assert_eq!(instance.memory(0).unwrap().read_u32(0).unwrap(), 7);

        // And the instance remains callable if the host chooses to keep it
        let err = instance.call("poke_then_trap", &[]).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Unreachable)));
    }

    // The fuel budget bounds runaway guest code.
    #[test]
    fn test_fuel_bounds_infinite_loop() {
        let mut instance = instantiate(
            r#"(module (func (export "spin") (loop br 0)))"#,
        );

        let err = instance
            .call_with_fuel("spin", &[], Some(10_000))
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::OutOfFuel)));
        assert!(last_error_string().contains("fuel"));
    }

    #[test]
    fn test_fuel_unset_does_not_limit() {
        let mut instance = instantiate(
            r#"(module
                (func (export "count") (result i32)
                    (local $n i32)
                    (loop $l
                        local.get $n
                        i32.const 1
                        i32.add
                        local.set $n
                        local.get $n
                        i32.const 100000
                        i32.lt_s
                        br_if $l)
                    local.get $n))"#,
        );
        assert_eq!(
            instance.call("count", &[]).unwrap(),
            vec![Value::I32(100000)]
        );
    }

    // Ownership pairing: creation hands the caller an owned value, drop
    // releases it exactly once, and independent objects stay independent.
    #[test]
    fn test_ownership_and_drop() {
        let memory = Memory::new(Limits { min: 1, max: None }).unwrap();
        let table = Table::new(Limits { min: 1, max: None }).unwrap();
        let global = Global::new(Value::F32(1.5), Mutability::Const);
        let imports = ImportObject::new();
        drop(memory);
        drop(table);
        drop(global);
        drop(imports);

        // An import object outlives instances built from it and is reusable
        let mut imports = ImportObject::new();
        imports
            .register(
                "env",
                "two",
                HostFunction::new(vec![], vec![ValueKind::I32], |_, _| Ok(vec![Value::I32(2)])),
            )
            .unwrap();
        let source = r#"(module
            (import "env" "two" (func $two (result i32)))
            (func (export "four") (result i32) call $two call $two i32.add))"#;
        let bytes = module(source);

        let mut first = Instance::instantiate(&bytes, &imports).unwrap();
        assert_eq!(first.call("four", &[]).unwrap(), vec![Value::I32(4)]);
        drop(first);

        let mut second = Instance::instantiate(&bytes, &imports).unwrap();
        assert_eq!(second.call("four", &[]).unwrap(), vec![Value::I32(4)]);
    }

    // Instances on separate threads keep separate error channels.
    #[test]
    fn test_error_channel_is_per_thread() {
        let mut local = instantiate("(module)");
        local.call("missing_here", &[]).unwrap_err();

        let handle = std::thread::spawn(|| {
            let mut remote = Instance::instantiate(
                &wat::parse_str("(module)").unwrap(),
                &ImportObject::new(),
            )
            .unwrap();
            remote.call("missing_there", &[]).unwrap_err();
            let mut buf = vec![0u8; last_error_length()];
            last_error_message(&mut buf);
            String::from_utf8(buf).unwrap()
        });

        let remote_message = handle.join().unwrap();
        assert!(remote_message.contains("missing_there"));
        // This thread's channel still holds its own failure
        assert!(last_error_string().contains("missing_here"));
    }

    #[test]
    fn test_unresolved_import_names_the_import() {
        let err = Instance::instantiate(
            &module(r#"(module (import "wasi" "clock" (func (result i64))))"#),
            &ImportObject::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::UnresolvedImport { .. })));
        assert!(last_error_string().contains("wasi.clock"));
    }
}
