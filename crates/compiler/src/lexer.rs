use crate::error::CompileError;
use logos::Logos;

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some('\n') => {}
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn quoted(slice: &str) -> String {
    unescape(&slice[1..slice.len() - 1])
}

fn radix(slice: &str, base: u32) -> Option<f64> {
    u64::from_str_radix(&slice[2..], base).ok().map(|n| n as f64)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum TokenKind {
    // Keywords
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("const")]
    Const,
    #[token("let")]
    Let,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("throw")]
    Throw,
    #[token("new")]
    New,
    #[token("typeof")]
    TypeOf,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("export")]
    Export,
    #[token("default")]
    Default,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| radix(lex.slice(), 16))]
    #[regex(r"0[bB][01]+", |lex| radix(lex.slice(), 2))]
    #[regex(r"0[oO][0-7]+", |lex| radix(lex.slice(), 8))]
    Number(f64),
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| quoted(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| quoted(lex.slice()))]
    #[regex(r"`([^`\\$]|\\.|\$[^{`])*\$?`", |lex| quoted(lex.slice()))]
    Str(String),

    // Identifiers (contextual words such as `type`, `as`, `of` users may still bind)
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("==")]
    EqEq,
    #[token("===")]
    EqEqEq,
    #[token("!=")]
    BangEq,
    #[token("!==")]
    BangEqEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token(">>>")]
    UShr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    QuestionQuestion,
    #[token("!")]
    Bang,
    #[token("?")]
    Question,
    #[token("=>")]
    FatArrow,
    #[token("...")]
    Ellipsis,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

/// Byte offsets at which each line starts.
fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn position(starts: &[usize], offset: usize) -> (usize, usize) {
    let line = starts.partition_point(|&s| s <= offset);
    let col = offset - starts[line.saturating_sub(1)] + 1;
    (line, col)
}

fn tokenize(source: &str, strict: bool) -> Result<Vec<Token>, CompileError> {
    let starts = line_starts(source);
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);
    let mut prev_line = 1usize;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, col) = position(&starts, span.start);
        match result {
            Ok(kind) => {
                tokens.push(Token {
                    kind,
                    line,
                    col,
                    newline_before: !tokens.is_empty() && line > prev_line,
                });
                prev_line = position(&starts, span.end.saturating_sub(1).max(span.start)).0;
            }
            Err(()) if strict => {
                return Err(CompileError::Lexer {
                    line,
                    col,
                    msg: format!("unexpected character: {:?}", &source[span.start..span.end]),
                });
            }
            Err(()) => {}
        }
    }

    Ok(tokens)
}

/// Lex a submission, failing on the first unrecognised character.
pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    tokenize(source, true)
}

/// Lex a submission, dropping unrecognised characters instead of failing.
pub fn lex_lenient(source: &str) -> Vec<Token> {
    tokenize(source, false).unwrap_or_default()
}
