#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::lexer::{self, TokenKind};
    use crate::parser::{self, MAX_NESTING};
    use crate::resolve;
    use crate::{normalize, scan, CompileError, RejectionReason};
    use mystery_bytecode::{Capability, Op};

    fn parse(source: &str) -> Program {
        parser::parse(lexer::lex(source).unwrap()).unwrap()
    }

    // --- Lexer Tests ---

    #[test]
    fn test_lex_numbers_and_strings() {
        let tokens = lexer::lex(r#"0x1F 3.5 1e3 'a\n' "b" `c`"#).unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds[0], TokenKind::Number(31.0));
        assert_eq!(kinds[1], TokenKind::Number(3.5));
        assert_eq!(kinds[2], TokenKind::Number(1000.0));
        assert_eq!(kinds[3], TokenKind::Str("a\n".into()));
        assert_eq!(kinds[4], TokenKind::Str("b".into()));
        assert_eq!(kinds[5], TokenKind::Str("c".into()));
    }

    #[test]
    fn test_lex_operators_longest_match() {
        let tokens = lexer::lex("=== !== >>> ** ?? => ...").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::EqEqEq,
                TokenKind::BangEqEq,
                TokenKind::UShr,
                TokenKind::StarStar,
                TokenKind::QuestionQuestion,
                TokenKind::FatArrow,
                TokenKind::Ellipsis,
            ]
        );
    }

    #[test]
    fn test_lex_skips_comments_and_tracks_lines() {
        let tokens = lexer::lex("a // one\n/* two\nthree */ b").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 3);
        assert!(tokens[1].newline_before);
    }

    #[test]
    fn test_lex_error_reports_position() {
        let err = lexer::lex("let x = 1\nlet y = #").unwrap_err();
        assert!(matches!(err, CompileError::Lexer { line: 2, .. }));
    }

    // --- Parser Tests ---

    #[test]
    fn test_parse_function_declaration() {
        let program = parse("function isValid(arr: number[]): boolean { return arr.length > 0; }");
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::Function(f) => {
                assert_eq!(f.name.as_deref(), Some("isValid"));
                assert_eq!(f.params.len(), 1);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_arrow_binding() {
        let program = parse("const check = (arr: readonly number[]) => arr.every(n => n > 0)");
        match &program.body[0] {
            Stmt::Var { kind, decls, .. } => {
                assert_eq!(*kind, DeclKind::Const);
                assert!(matches!(decls[0].init, Some(Expr::Function(_))));
            }
            other => panic!("expected binding, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_erases_type_declarations() {
        let program = parse(
            "type Pred = (xs: Array<Array<number>>) => boolean;\n\
             interface Box<T> { value: T; next?: Box<T> }\n\
             export function f(arr: Map<string, number[]> | null) { return true }",
        );
        let functions = program
            .body
            .iter()
            .filter(|s| matches!(s, Stmt::Function(_)))
            .count();
        assert_eq!(functions, 1);
    }

    #[test]
    fn test_parse_as_and_non_null() {
        let program = parse("function f(arr) { const x = (arr[0] as number)!; return x! > 0 }");
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_parse_ternary_with_parenthesised_branch() {
        let program = parse("function f(a) { return a.length ? (a[0]) : (a[1]) }");
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse("x = 1 + 2 * 3 ** 2 ** 1");
        let Stmt::Expr(Expr::Assign { value, .. }) = &program.body[0] else {
            panic!("expected assignment");
        };
        let Expr::Binary(BinOp::Add, _, rhs) = value.as_ref() else {
            panic!("expected addition at the root");
        };
        let Expr::Binary(BinOp::Mul, _, pow) = rhs.as_ref() else {
            panic!("expected multiplication");
        };
        // `**` is right-associative.
        assert!(matches!(pow.as_ref(), Expr::Binary(BinOp::Pow, _, inner) if matches!(inner.as_ref(), Expr::Binary(BinOp::Pow, _, _))));
    }

    #[test]
    fn test_parse_for_forms() {
        let program = parse(
            "function f(arr) {\n\
               for (let i = 0, j = arr.length - 1; i < j; i++, j--) {}\n\
               for (const x of arr) { if (x) continue; else break }\n\
               let k = 0\n\
               do { k++ } while (k < 3)\n\
               while (k > 0) k--\n\
               return true\n\
             }",
        );
        assert_eq!(program.body.len(), 1);
    }

    #[test]
    fn test_parse_asi_requires_line_break() {
        let err = parser::parse(lexer::lex("let a = 1 let b = 2").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::Parse { line: 1, .. }));
        assert!(parser::parse(lexer::lex("let a = 1\nlet b = 2").unwrap()).is_ok());
    }

    #[test]
    fn test_parse_return_on_own_line() {
        let program = parse("function f(a) {\n  return\n  a\n}");
        let Stmt::Function(f) = &program.body[0] else {
            panic!("expected function");
        };
        let Body::Block(stmts) = &f.body else {
            panic!("expected block body");
        };
        assert!(matches!(stmts[0], Stmt::Return(None)));
    }

    #[test]
    fn test_parse_error_has_line() {
        let err = parser::parse(lexer::lex("function f(a) {\n  return (a\n}").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }

    // --- Entry discovery ---

    #[test]
    fn test_entry_from_declaration_or_binding() {
        assert_eq!(resolve::find_entry(&parse("function rule(a) { return true }")).unwrap(), "rule");
        assert_eq!(resolve::find_entry(&parse("const rule = a => true")).unwrap(), "rule");
        assert_eq!(
            resolve::find_entry(&parse("const LIMIT = 3\nlet rule = function (a) { return a.length < LIMIT }"))
                .unwrap(),
            "rule"
        );
    }

    #[test]
    fn test_entry_missing() {
        let err = normalize("const x = 1").unwrap_err();
        assert_eq!(err, CompileError::NoEntryPoint);
        assert_eq!(err.to_string(), "No function was defined. Please define a function.");
    }

    #[test]
    fn test_entry_ambiguous() {
        let err = normalize("function a(x) { return true }\nfunction b(x) { return false }").unwrap_err();
        assert_eq!(err, CompileError::AmbiguousEntryPoint(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_entry_arity() {
        let err = normalize("function pair(a, b) { return a < b }").unwrap_err();
        assert_eq!(
            err,
            CompileError::EntryArity {
                name: "pair".into(),
                found: 2
            }
        );
    }

    #[test]
    fn test_nested_helpers_are_not_entry_points() {
        let unit = normalize(
            "function isValid(arr) {\n\
               function isPrime(n) { if (n < 2) return false; for (let d = 2; d * d <= n; d++) if (n % d === 0) return false; return true }\n\
               const gcd = (a, b) => b === 0 ? a : gcd(b, a % b)\n\
               return arr.every(isPrime) && gcd(4, 6) === 2\n\
             }",
        )
        .unwrap();
        assert_eq!(unit.entry_name, "isValid");
        assert!(unit.module.validate().is_ok());
    }

    // --- Capture analysis and codegen ---

    #[test]
    fn test_captured_bindings_are_boxed() {
        let program = parse("function f(arr) { let total = 0; let plain = 1; arr.forEach(x => { total += x }); return total > plain }");
        let captures = resolve::analyze(&program);
        let Stmt::Function(f) = &program.body[0] else {
            panic!("expected function");
        };
        let boxed = captures.boxed_in(f.id);
        assert!(boxed.contains("total"));
        assert!(!boxed.contains("plain"));
    }

    #[test]
    fn test_codegen_uses_cells_for_captures() {
        let unit = normalize("function f(arr) { let seen = 0; arr.forEach(x => { seen++ }); return seen > 0 }").unwrap();
        let module = &unit.module;
        let entry = module.functions.iter().find(|f| f.name == "f").unwrap();
        assert!(entry.code.iter().any(|op| matches!(op, Op::InitCell(_))));
        let inner = module.functions.iter().find(|f| f.name == "anonymous").unwrap();
        assert_eq!(inner.captures.len(), 1);
        assert!(inner.code.iter().any(|op| matches!(op, Op::StoreUpvalue(0))));
    }

    #[test]
    fn test_script_is_function_zero() {
        let unit = normalize("const isValid = (arr) => arr.length === 0").unwrap();
        assert_eq!(unit.module.entry, 0);
        assert_eq!(unit.module.functions[0].name, "script");
        assert!(unit.module.functions.iter().any(|f| f.name == "isValid" && f.arity == 1));
    }

    #[test]
    fn test_codegen_rejects_const_reassignment() {
        let err = normalize("function f(a) { const x = 1; x = 2; return true }").unwrap_err();
        assert!(matches!(err, CompileError::Codegen { .. }));
    }

    #[test]
    fn test_codegen_rejects_stray_break() {
        let err = normalize("function f(a) { break; return true }").unwrap_err();
        assert!(matches!(err, CompileError::Codegen { .. }));
    }

    #[test]
    fn test_codegen_rejects_redeclaration() {
        let err = normalize("function f(a) { let x = 1; let x = 2; return true }").unwrap_err();
        assert!(matches!(err, CompileError::Codegen { .. }));
    }

    #[test]
    fn test_module_json_inspection() {
        let unit = normalize("function f(arr) { return [...arr, 1].includes(1) }").unwrap();
        let json = unit.module.to_json().unwrap();
        assert!(json.contains("ArrayExtend"));
        assert!(json.contains("includes"));
    }

    // --- Scanner ---

    #[test]
    fn test_scan_accepts_plain_predicate() {
        assert!(scan("function f(arr) { return arr.every(n => n % 2 === 0) }").is_ok());
    }

    #[test]
    fn test_scan_rejects_each_capability() {
        let cases = [
            ("function f(a) { return eval('true') }", Capability::DynamicEval),
            ("function f(a) { return new Function('return 1')() }", Capability::DynamicEval),
            ("const fs = require('fs')", Capability::ModuleLoading),
            ("import fs from 'fs'", Capability::ModuleLoading),
            ("function f(a) { setTimeout(() => 0, 1); return true }", Capability::Timer),
            ("function f(a) { fetch('http://x'); return true }", Capability::Network),
            ("function f(a) { return process.exit(1) }", Capability::HostGlobal),
            ("function f(a) { return globalThis }", Capability::HostGlobal),
            ("function f(a) { return a.constructor }", Capability::PrototypeAccess),
        ];
        for (source, capability) in cases {
            let reason = scan(source).unwrap_err();
            assert_eq!(reason.capability(), capability, "{source}");
        }
    }

    #[test]
    fn test_scan_ignores_comments_and_strings() {
        assert!(scan("// eval(x)\nfunction f(a) { const s = 'require(\"fs\")'; return s.length > 0 }").is_ok());
        assert!(scan("/* setTimeout */ function f(a) { return true }").is_ok());
    }

    #[test]
    fn test_scan_reports_first_match_with_line() {
        let reason = scan("function f(a) {\n  fetch('x')\n  eval('y')\n}").unwrap_err();
        assert_eq!(
            reason,
            RejectionReason::Network {
                token: "fetch".into(),
                line: 2
            }
        );
    }

    #[test]
    fn test_scan_call_trigger_needs_call() {
        // A parameter merely named like a host function is not a call.
        assert!(scan("function f(fetch) { return fetch > 0 }").is_ok());
        assert!(scan("function f(global) { return global > 0 }").is_ok());
    }

    #[test]
    fn test_scan_prototype_names_need_member_access() {
        assert!(scan("function f(a) { let constructor = 0; return constructor === 0 }").is_ok());
        assert!(scan("function f(prototype) { return prototype > 0 }").is_ok());
        assert!(scan("function f(a) { const o = { __proto__: 1 }; return true }").is_ok());

        for source in [
            "function f(a) { return a.constructor === Array }",
            "function f(a) { return a?.__proto__ }",
            "function f(a) { return Array.prototype.slice }",
            "function f(a) { return a\n  .constructor }",
        ] {
            let reason = scan(source).unwrap_err();
            assert_eq!(reason.capability(), Capability::PrototypeAccess, "{source}");
        }
    }

    #[test]
    fn test_scan_survives_unlexable_text() {
        let reason = scan("function f(a) { # eval(a) }").unwrap_err();
        assert_eq!(reason.capability(), Capability::DynamicEval);
    }

    #[test]
    fn test_parser_rejects_runaway_nesting() {
        let parens = format!("function f(a) {{ return {}1{} > 0 }}", "(".repeat(2000), ")".repeat(2000));
        let err = normalize(&parens).unwrap_err();
        assert!(matches!(err, CompileError::Parse { ref msg, .. } if msg.contains("nested too deeply")));

        let chain = format!("function f(a) {{ return 0{} > 0 }}", " + 1".repeat(5000));
        assert!(matches!(normalize(&chain), Err(CompileError::Parse { .. })));
    }

    fn nested_blocks(depth: usize) -> String {
        format!("function f(a) {{ {}{} }}", "{ ".repeat(depth), " }".repeat(depth))
    }

    #[test]
    fn test_nesting_cap_boundary() {
        assert!(normalize(&nested_blocks(MAX_NESTING - 1)).is_ok());
        let err = normalize(&nested_blocks(MAX_NESTING)).unwrap_err();
        assert!(matches!(err, CompileError::Parse { ref msg, .. } if msg.contains("nested too deeply")));
    }

    #[test]
    fn test_deep_nesting_on_a_small_caller_stack() {
        let worker = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let blocks = normalize(&nested_blocks(MAX_NESTING - 1)).is_ok();
                let parens = format!(
                    "function f(a) {{ return {}a.length{} > 0 }}",
                    "(".repeat(MAX_NESTING / 4 - 4),
                    ")".repeat(MAX_NESTING / 4 - 4)
                );
                blocks && normalize(&parens).is_ok()
            })
            .unwrap();
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_parser_allows_ordinary_nesting() {
        let source = "function f(a) { return a.every((x, i) => i === 0 || ((a[i - 1] + (x * (2 - 1))) >= 0)) }";
        assert!(normalize(source).is_ok());
    }
}
