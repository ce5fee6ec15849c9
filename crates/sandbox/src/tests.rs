#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::heap::Heap;
    use crate::value::{Shared, Value};
    use crate::*;
    use mystery_compiler::normalize;

    fn run_with(source: &str, input: &[i64], limits: ExecutionLimits) -> ExecutionOutcome {
        let unit = normalize(source).unwrap();
        invoke(&unit, input, limits)
    }

    fn run(source: &str, input: &[i64]) -> ExecutionOutcome {
        run_with(source, input, ExecutionLimits::default())
    }

    fn verdict(source: &str, input: &[i64]) -> bool {
        match run(source, input) {
            ExecutionOutcome::Success(b) => b,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn failure(outcome: ExecutionOutcome) -> (FailureKind, String) {
        match outcome {
            ExecutionOutcome::Failure { kind, message } => (kind, message),
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    // --- Basic evaluation ---

    #[test]
    fn test_every_positive() {
        let src = "function allPositive(arr) { return arr.every(n => n > 0); }";
        assert!(verdict(src, &[1, 2, 3]));
        assert!(!verdict(src, &[1, -2, 3]));
        assert!(verdict(src, &[]));
    }

    #[test]
    fn test_arrow_entry_with_types() {
        let src = "const noDupes = (arr: number[]): boolean => new Set<number>(arr).size === arr.length;";
        assert!(verdict(src, &[1, 2, 3]));
        assert!(!verdict(src, &[1, 2, 1]));
    }

    #[test]
    fn test_loops_and_locals() {
        let src = r#"
            function sumIsEven(arr) {
                let total = 0;
                for (let i = 0; i < arr.length; i++) {
                    total += arr[i];
                }
                return total % 2 === 0;
            }
        "#;
        assert!(verdict(src, &[1, 3]));
        assert!(!verdict(src, &[1, 2]));
    }

    #[test]
    fn test_closure_counter_and_for_of() {
        let src = r#"
            function countMatches(arr) {
                let count = 0;
                const bump = () => { count += 1; };
                for (const x of arr) {
                    if (x > 0) bump();
                }
                return count === 2;
            }
        "#;
        assert!(verdict(src, &[1, -1, 5]));
        assert!(!verdict(src, &[1, 2, 3]));
    }

    #[test]
    fn test_nested_recursive_helper() {
        let src = r#"
            function bigSum(arr) {
                function sum(i) {
                    return i >= arr.length ? 0 : arr[i] + sum(i + 1);
                }
                return sum(0) > 10;
            }
        "#;
        assert!(verdict(src, &[5, 6]));
        assert!(!verdict(src, &[5, 5]));
    }

    #[test]
    fn test_closures_capture_per_iteration() {
        let src = r#"
            function check(arr) {
                const fns = [];
                for (const x of arr) {
                    fns.push(() => x * 2);
                }
                return fns.map(f => f()).join(",") === "2,4,6";
            }
        "#;
        assert!(verdict(src, &[1, 2, 3]));
    }

    #[test]
    fn test_sort_with_comparator_and_default_order() {
        let sorted = r#"
            function isSorted(arr) {
                const copy = [...arr].sort((a, b) => a - b);
                return copy.every((v, i) => v === arr[i]);
            }
        "#;
        assert!(verdict(sorted, &[-3, 0, 2, 2, 9]));
        assert!(!verdict(sorted, &[1, 3, 2]));

        let lexical = "function f(arr) { return [...arr].sort().join() === '1,10,9'; }";
        assert!(verdict(lexical, &[10, 9, 1]));
    }

    #[test]
    fn test_map_and_set_methods() {
        let src = r#"
            function allUnique(arr) {
                const counts = new Map();
                for (const x of arr) counts.set(x, (counts.get(x) ?? 0) + 1);
                return [...counts.values()].every(c => c === 1);
            }
        "#;
        assert!(verdict(src, &[1, 2, 3]));
        assert!(!verdict(src, &[4, 4]));

        let set = "function f(arr) { const s = new Set(); arr.forEach(x => s.add(x % 3)); return s.has(0) && s.size === 2; }";
        assert!(verdict(set, &[3, 4, 6]));
        assert!(!verdict(set, &[1, 2, 4]));
    }

    #[test]
    fn test_reduce_math_and_nan_comparisons() {
        let src = "function avgAbove(arr) { return arr.reduce((a, b) => a + b, 0) / arr.length > 2; }";
        assert!(verdict(src, &[3, 4]));
        // 0 / 0 is NaN, and NaN compares false.
        assert!(!verdict(src, &[]));

        let math = "function f(arr) { return Math.max(...arr) - Math.min(...arr) <= Math.abs(-3); }";
        assert!(verdict(math, &[1, 4]));
        assert!(!verdict(math, &[1, 5]));
    }

    #[test]
    fn test_bitwise_and_loose_equality() {
        let src = "function allEven(arr) { return arr.every(n => (n & 1) === 0); }";
        assert!(verdict(src, &[2, -4, 0]));
        assert!(!verdict(src, &[-3]));

        let loose = "function f(arr) { return arr.length == '2' && arr[5] == null; }";
        assert!(verdict(loose, &[1, 2]));
    }

    #[test]
    fn test_string_helpers() {
        let src = r#"
            function f(arr) {
                const s = arr.join("-");
                return s.split("-").length === arr.length && s.startsWith("1") && `x`.repeat(3) === "xxx";
            }
        "#;
        assert!(verdict(src, &[1, 2, 3]));
    }

    #[test]
    fn test_typeof_unknown_global_is_undefined() {
        let src = "function f(arr) { return typeof fetch === 'undefined' && typeof Math === 'object'; }";
        assert!(verdict(src, &[]));
    }

    // --- Failures ---

    #[test]
    fn test_non_boolean_is_type_mismatch() {
        let (kind, message) = failure(run("function f(arr) { return arr.length; }", &[1]));
        assert_eq!(kind, FailureKind::TypeMismatch);
        assert_eq!(message, "expected boolean, got number");

        let (_, message) = failure(run("function f(arr) { return null; }", &[]));
        assert_eq!(message, "expected boolean, got object");

        let (_, message) = failure(run("function f(arr) { if (arr.length) return true; }", &[]));
        assert_eq!(message, "expected boolean, got undefined");
    }

    #[test]
    fn test_throw_is_runtime_error() {
        let (kind, message) = failure(run(
            "function f(arr) { throw new TypeError('bad input'); }",
            &[],
        ));
        assert_eq!(kind, FailureKind::RuntimeError);
        assert_eq!(message, "TypeError: bad input");
    }

    #[test]
    fn test_property_of_undefined_is_runtime_error() {
        let (kind, message) = failure(run("function f(arr) { return arr[10].length > 0; }", &[1]));
        assert_eq!(kind, FailureKind::RuntimeError);
        assert!(message.contains("Cannot read properties of undefined"), "{message}");
    }

    #[test]
    fn test_unknown_global_is_reference_error() {
        let (kind, message) = failure(run("function f(arr) { return helper(arr); }", &[]));
        assert_eq!(kind, FailureKind::RuntimeError);
        assert_eq!(message, "ReferenceError: helper is not defined");
    }

    #[test]
    fn test_host_globals_are_denied_at_runtime() {
        for src in [
            "function f(arr) { const g = globalThis; return true; }",
            "function f(arr) { return process.exit(0); }",
            "function f(arr) { return eval('1') === 1; }",
            "function f(arr) { const k = 'constr' + 'uctor'; return arr[k] !== undefined; }",
        ] {
            let (kind, message) = failure(run(src, &[]));
            assert_eq!(kind, FailureKind::RuntimeError, "{src}");
            assert!(message.starts_with("Forbidden capability"), "{src}: {message}");
        }
    }

    #[test]
    fn test_infinite_loop_hits_step_ceiling() {
        let limits = ExecutionLimits {
            time: Duration::from_secs(10),
            max_steps: 10_000,
            ..ExecutionLimits::default()
        };
        let (kind, _) = failure(run_with("function f(arr) { while (true) {} }", &[], limits));
        assert_eq!(kind, FailureKind::Timeout);
    }

    #[test]
    fn test_infinite_loop_hits_wall_clock_deadline() {
        let limits = ExecutionLimits {
            time: Duration::from_millis(20),
            max_steps: u64::MAX,
            ..ExecutionLimits::default()
        };
        let (kind, message) = failure(run_with(
            "function f(arr) { let i = 0; while (true) { i++; } }",
            &[],
            limits,
        ));
        assert_eq!(kind, FailureKind::Timeout);
        assert_eq!(message, "Execution timeout: your code took too long to execute");
    }

    #[test]
    fn test_string_doubling_hits_memory_ceiling() {
        let limits = ExecutionLimits {
            memory_bytes: 1 << 20,
            ..ExecutionLimits::default()
        };
        let (kind, message) = failure(run_with(
            "function f(arr) { let s = 'x'; while (true) { s = s + s; } }",
            &[],
            limits,
        ));
        assert_eq!(kind, FailureKind::MemoryExceeded);
        assert_eq!(message, "Memory limit exceeded: your code used too much memory");
    }

    fn small_heap() -> ExecutionLimits {
        ExecutionLimits {
            memory_bytes: 1 << 20,
            ..ExecutionLimits::default()
        }
    }

    #[test]
    fn test_concat_is_charged_per_argument() {
        let src = "function f(arr) {
            const big = 'x'.repeat(100000);
            return big.concat(big, big, big, big, big, big, big, big, big, big, big).length > 0;
        }";
        let (kind, _) = failure(run_with(src, &[], small_heap()));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_join_is_charged_per_element() {
        let src = "function f(arr) {
            const row = new Array(2000).fill('y'.repeat(1000));
            return row.join(',').length > 0;
        }";
        let (kind, _) = failure(run_with(src, &[], small_heap()));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_nested_array_to_string_is_bounded() {
        let src = "function f(arr) {
            const row = new Array(200).fill('w'.repeat(10000));
            const grid = [row, row, row, row, row, row];
            return String(grid).length + ('' + [grid, grid]).length > 0;
        }";
        let (kind, _) = failure(run_with(src, &[], small_heap()));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_string_append_loop_hits_memory_ceiling() {
        let src = "function f(arr) {
            const chunk = 'z'.repeat(50000);
            let s = '';
            for (let i = 0; i < 100; i++) { s = s + chunk; }
            return s.length > 0;
        }";
        let (kind, _) = failure(run_with(src, &[], small_heap()));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_padding_is_charged_before_building() {
        let (kind, _) = failure(run_with(
            "function f(arr) { return 'a'.padStart(5e6, 'bc').length > 0; }",
            &[],
            small_heap(),
        ));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_text_under_the_ceiling_still_builds() {
        let src = "function f(arr) {
            const part = 'q'.repeat(1000);
            return [part, part, part].join('-').length === 3002 && part.concat(part).length === 2000;
        }";
        assert!(matches!(run_with(src, &[], small_heap()), ExecutionOutcome::Success(true)));
    }

    #[test]
    fn test_huge_array_is_charged_before_allocation() {
        let (kind, _) = failure(run("function f(arr) { return new Array(1e9).length > 0; }", &[]));
        assert_eq!(kind, FailureKind::MemoryExceeded);

        let (kind, _) = failure(run("function f(arr) { arr[1e12] = 1; return true; }", &[]));
        assert_eq!(kind, FailureKind::MemoryExceeded);
    }

    #[test]
    fn test_runaway_recursion_overflows() {
        let (kind, message) = failure(run(
            "function f(arr) { function r(n) { return r(n + 1); } return r(0); }",
            &[],
        ));
        assert_eq!(kind, FailureKind::RuntimeError);
        assert!(message.contains("Maximum call stack size exceeded"));
    }

    #[test]
    fn test_callback_recursion_overflows() {
        let (kind, _) = failure(run(
            "function f(arr) { function r() { return [1].some(() => r()); } return r(); }",
            &[],
        ));
        assert_eq!(kind, FailureKind::RuntimeError);
    }

    // --- Isolation ---

    #[test]
    fn test_input_mutation_does_not_leak_between_invocations() {
        let unit = normalize("function f(arr) { arr.push(0); return arr.length === 2; }").unwrap();
        for _ in 0..3 {
            assert_eq!(
                invoke(&unit, &[7], ExecutionLimits::default()),
                ExecutionOutcome::Success(true)
            );
        }
    }

    #[test]
    fn test_cyclic_data_is_harmless() {
        let src = r#"
            function f(arr) {
                const a = [1];
                a.push(a);
                const m = new Map();
                m.set("self", m);
                return String(a).length > 0 && m.get("self") === m;
            }
        "#;
        assert!(verdict(src, &[]));
    }

    #[test]
    fn test_deeply_nested_arrays_are_released() {
        let limits = ExecutionLimits {
            time: Duration::from_secs(30),
            ..ExecutionLimits::default()
        };
        let src = "function f(arr) { let a = []; for (let i = 0; i < 50000; i++) { a = [a]; } a = null; return true; }";
        assert_eq!(run_with(src, &[], limits), ExecutionOutcome::Success(true));
    }

    #[test]
    fn test_deep_value_drop_does_not_recurse() {
        let mut v = Value::Undefined;
        for _ in 0..200_000 {
            v = Value::Array(Shared::new(vec![v]));
        }
        drop(v);
    }

    // --- Heap accounting ---

    #[test]
    fn test_heap_reclaims_dropped_objects() {
        let mut heap = Heap::new(4096);
        for _ in 0..100 {
            let s = heap.string(&"x".repeat(100)).unwrap();
            drop(s);
        }
        assert!(heap.used() <= 4096);
    }

    #[test]
    fn test_heap_limit_counts_live_objects() {
        let mut heap = Heap::new(4096);
        let mut keep = Vec::new();
        let err = loop {
            match heap.string(&"x".repeat(100)) {
                Ok(v) => keep.push(v),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, VmError::OutOfMemory));
        assert!(!keep.is_empty());
    }

    #[test]
    fn test_text_reservations_survive_sweeps() {
        let mut heap = Heap::new(4096);
        heap.reserve(3000).unwrap();
        drop(heap.string(&"x".repeat(500)).unwrap());
        assert!(matches!(heap.reserve(1200), Err(VmError::OutOfMemory)));
        assert_eq!(heap.scratch(), 3000);

        heap.release_scratch(0);
        assert_eq!(heap.scratch(), 0);
        heap.reserve(3500).unwrap();
    }

    #[test]
    fn test_heap_release_breaks_cycles() {
        let mut heap = Heap::new(1 << 20);
        let list = heap.list(Vec::new()).unwrap();
        list.borrow_mut().push(Value::Array(list.clone()));
        heap.release();
        assert!(list.borrow().is_empty());
    }

    #[test]
    fn test_invalid_module_is_rejected() {
        let mut unit = normalize("function f(arr) { return true; }").unwrap();
        unit.module.version = 99;
        let (kind, message) = failure(invoke(&unit, &[], ExecutionLimits::default()));
        assert_eq!(kind, FailureKind::RuntimeError);
        assert!(message.contains("unsupported version"));
    }
}
