use mystery_bytecode::Capability;

use crate::error::RejectionReason;
use crate::lexer::{lex_lenient, Token, TokenKind};

/// What must follow a name for it to count as a use of the capability.
#[derive(Clone, Copy)]
enum Trigger {
    /// Any occurrence of the name.
    Any,
    /// The name is called: `name(`.
    Call,
    /// The name is dereferenced: `name.` or `name[`.
    Member,
    /// The name is read off another value: `.name`.
    Property,
}

const PATTERNS: &[(&str, Trigger, Capability)] = &[
    ("eval", Trigger::Any, Capability::DynamicEval),
    ("Function", Trigger::Call, Capability::DynamicEval),
    ("require", Trigger::Call, Capability::ModuleLoading),
    ("import", Trigger::Any, Capability::ModuleLoading),
    ("setTimeout", Trigger::Any, Capability::Timer),
    ("setInterval", Trigger::Any, Capability::Timer),
    ("setImmediate", Trigger::Any, Capability::Timer),
    ("fetch", Trigger::Call, Capability::Network),
    ("XMLHttpRequest", Trigger::Any, Capability::Network),
    ("WebSocket", Trigger::Any, Capability::Network),
    ("process", Trigger::Member, Capability::HostGlobal),
    ("global", Trigger::Member, Capability::HostGlobal),
    ("globalThis", Trigger::Any, Capability::HostGlobal),
    ("constructor", Trigger::Property, Capability::PrototypeAccess),
    ("__proto__", Trigger::Property, Capability::PrototypeAccess),
    ("prototype", Trigger::Property, Capability::PrototypeAccess),
];

fn fires(trigger: Trigger, prev: Option<&Token>, next: Option<&Token>) -> bool {
    let prev = prev.map(|t| &t.kind);
    let next = next.map(|t| &t.kind);
    match trigger {
        Trigger::Any => true,
        Trigger::Call => matches!(next, Some(TokenKind::LParen)),
        Trigger::Member => matches!(next, Some(TokenKind::Dot | TokenKind::LBracket)),
        Trigger::Property => matches!(prev, Some(TokenKind::Dot)),
    }
}

/// Static pre-execution gate. Reports the first forbidden construct in source order.
/// Names inside comments and string literals are not tokens and never match.
pub fn scan(source: &str) -> Result<(), RejectionReason> {
    let tokens = lex_lenient(source);
    for (i, token) in tokens.iter().enumerate() {
        let TokenKind::Ident(name) = &token.kind else {
            continue;
        };
        let prev = i.checked_sub(1).and_then(|j| tokens.get(j));
        let hit = PATTERNS.iter().find(|(pattern, trigger, _)| {
            *pattern == name.as_str() && fires(*trigger, prev, tokens.get(i + 1))
        });
        if let Some((pattern, _, capability)) = hit {
            log::warn!(
                "scanner rejected submission: {} via '{}' at line {}",
                capability,
                pattern,
                token.line
            );
            return Err(RejectionReason::new(*capability, *pattern, token.line));
        }
    }
    Ok(())
}
