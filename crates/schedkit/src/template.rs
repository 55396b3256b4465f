//! Two-pass config templating with deferred values.
//!
//! Config files may contain actions such as `{{ env "REGION" "us-east-1" }}`,
//! `{{ must_env "DB_PASSWORD" }}` or plugin lookups like
//! `{{ tfstate "aws_ecs_cluster.main.name" }}`. Arguments may be
//! parenthesised sub-expressions: `{{ ssm (env "PARAM" "/app/default") }}`.
//!
//! Evaluation happens in two passes. The first pass resolves the builtin env
//! functions and turns everything it cannot resolve into a [`Deferred`]
//! token: an undefined `must_env` variable, or a call to a function that is
//! not registered yet. The config can then be parsed structurally to find
//! its plugins. The second pass rewrites deferred call tokens back into
//! template syntax and renders them with the plugin functions. A plugin key
//! computed by `env` in the first pass reaches the plugin already resolved.
//!
//! Env tokens that survive both passes are reported by explicit validation
//! right before a rule is applied or run.

use crate::error::{Error, Result};
use log::debug;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// A template function: takes the action arguments, returns the substitution
pub type TemplateFn = Arc<dyn Fn(&[String]) -> Result<String> + Send + Sync>;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

const BUILTINS: [&str; 2] = ["env", "must_env"];

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<<ecschedule:(env|call):([A-Za-z0-9_:.]*)>>").expect("valid token pattern")
});

// ============================================================================
// Deferred values
// ============================================================================

/// A value that could not be resolved yet
///
/// Rendered as `<<ecschedule:env:HEX>>` or `<<ecschedule:call:FUNC:HEX.HEX>>`
/// where each HEX is the hex-encoded UTF-8 of a name or argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    /// An undefined environment variable
    Env(String),
    /// A call to a function that was not registered
    Call {
        /// Function name
        func: String,
        /// Arguments; a deferred argument is embedded as its own token
        args: Vec<String>,
    },
}

impl Deferred {
    /// Deferred call to `func`
    pub fn call(func: &str, args: &[String]) -> Self {
        Deferred::Call {
            func: func.to_string(),
            args: args.to_vec(),
        }
    }

    /// Sentinel text embedded in the rendered output
    pub fn token(&self) -> String {
        match self {
            Deferred::Env(name) => format!("<<ecschedule:env:{}>>", hex::encode(name)),
            Deferred::Call { func, args } if args.is_empty() => {
                format!("<<ecschedule:call:{func}>>")
            }
            Deferred::Call { func, args } => {
                let encoded: Vec<String> = args.iter().map(hex::encode).collect();
                format!("<<ecschedule:call:{func}:{}>>", encoded.join("."))
            }
        }
    }

    /// Every deferred token in `text`, in order of appearance
    pub fn scan(text: &str) -> Vec<Deferred> {
        TOKEN_RE
            .captures_iter(text)
            .filter_map(|caps| Self::from_captures(&caps))
            .collect()
    }

    /// Every deferred value in `text`, including those nested in call arguments
    pub fn scan_nested(text: &str) -> Vec<Deferred> {
        let mut found = Vec::new();
        for d in Self::scan(text) {
            let inner: Vec<Deferred> = match &d {
                Deferred::Call { args, .. } => args.iter().flat_map(|a| Self::scan_nested(a)).collect(),
                Deferred::Env(_) => Vec::new(),
            };
            found.push(d);
            found.extend(inner);
        }
        found
    }

    /// Template action equivalent to this value
    pub fn to_template(&self) -> String {
        format!("{{{{ {} }}}}", self.expr())
    }

    /// Action body; arguments that are themselves deferred become sub-expressions
    fn expr(&self) -> String {
        match self {
            Deferred::Env(name) => format!("must_env {}", quote(name)),
            Deferred::Call { func, args } => {
                let mut expr = func.clone();
                for arg in args {
                    expr.push(' ');
                    match Self::whole_token(arg) {
                        Some(inner) => {
                            expr.push('(');
                            expr.push_str(&inner.expr());
                            expr.push(')');
                        }
                        None => expr.push_str(&quote(arg)),
                    }
                }
                expr
            }
        }
    }

    /// The deferred value when `text` is exactly one token
    fn whole_token(text: &str) -> Option<Deferred> {
        let caps = TOKEN_RE.captures(text)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != text.len() {
            return None;
        }
        Self::from_captures(&caps)
    }

    fn from_captures(caps: &Captures<'_>) -> Option<Self> {
        let payload = caps.get(2)?.as_str();
        match caps.get(1)?.as_str() {
            "env" => decode(payload).map(Deferred::Env),
            _ => {
                let (func, args) = match payload.split_once(':') {
                    Some((func, encoded)) => (
                        func,
                        encoded.split('.').map(decode).collect::<Option<Vec<_>>>()?,
                    ),
                    None => (payload, Vec::new()),
                };
                if !is_identifier(func) {
                    return None;
                }
                Some(Deferred::Call {
                    func: func.to_string(),
                    args,
                })
            }
        }
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Env(name) => write!(f, "{name}"),
            Deferred::Call { .. } => write!(f, "{}", self.expr()),
        }
    }
}

fn decode(encoded: &str) -> Option<String> {
    hex::decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Parsing
// ============================================================================

/// A function call: the body of an action or a parenthesised sub-expression
#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    func: String,
    args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Literal(String),
    Call(Call),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Action(Call),
}

enum Word {
    Ident(String),
    Literal(String),
    Group(Call),
}

fn parse(src: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut rest = src;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let mut inner = &rest[start + 2..];
        if let Some(after) = inner.strip_prefix('-')
            && after.starts_with(char::is_whitespace)
        {
            text = text.trim_end();
            inner = after;
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }

        let (node, consumed, trim_after) = parse_action(inner)?;
        nodes.extend(node);
        rest = &inner[consumed..];
        trim_next = trim_after;
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
    Ok(nodes)
}

fn skip_ws(src: &str, pos: usize) -> usize {
    pos + src[pos..]
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(src.len() - pos)
}

/// Parse one action body; returns the node, bytes consumed through `}}`,
/// and whether the following text must be left-trimmed
fn parse_action(inner: &str) -> Result<(Option<Node>, usize, bool)> {
    let mut pos = skip_ws(inner, 0);
    let mut words = Vec::new();

    if inner[pos..].starts_with("/*") {
        let end = inner[pos + 2..]
            .find("*/")
            .ok_or_else(|| Error::template("unclosed comment"))?;
        pos += 2 + end + 2;
        let before = pos;
        pos = skip_ws(inner, pos);
        let rest = &inner[pos..];
        if rest.starts_with("}}") {
            return Ok((None, pos + 2, false));
        }
        if pos > before && rest.starts_with("-}}") {
            return Ok((None, pos + 3, true));
        }
        return Err(Error::template("comment must be the whole action"));
    }

    loop {
        let before = pos;
        pos = skip_ws(inner, pos);
        let rest = &inner[pos..];

        if rest.is_empty() {
            return Err(Error::template("unclosed action"));
        }
        if rest.starts_with("}}") {
            return Ok((Some(Node::Action(build_call(words)?)), pos + 2, false));
        }
        if pos > before && rest.starts_with("-}}") {
            return Ok((Some(Node::Action(build_call(words)?)), pos + 3, true));
        }

        let (word, len) = lex_word(rest)?;
        words.push(word);
        pos += len;
    }
}

/// Parse `(func args...)`; `src` starts at the opening parenthesis
fn parse_group(src: &str) -> Result<(Call, usize)> {
    let mut pos = 1;
    let mut words = Vec::new();
    loop {
        pos = skip_ws(src, pos);
        let rest = &src[pos..];
        if rest.is_empty() || rest.starts_with("}}") {
            return Err(Error::template("unclosed parenthesis"));
        }
        if rest.starts_with(')') {
            return Ok((build_call(words)?, pos + 1));
        }
        let (word, len) = lex_word(rest)?;
        words.push(word);
        pos += len;
    }
}

/// Lex the word at the start of `rest`, which is non-empty
fn lex_word(rest: &str) -> Result<(Word, usize)> {
    let mut chars = rest.chars();
    let Some(c) = chars.next() else {
        return Err(Error::template("unclosed action"));
    };
    let next_is_digit = chars.next().is_some_and(|n| n.is_ascii_digit());
    match c {
        '"' => {
            let (value, len) = lex_quoted(rest)?;
            Ok((Word::Literal(value), len))
        }
        '`' => {
            let end = rest[1..]
                .find('`')
                .ok_or_else(|| Error::template("unterminated raw string"))?;
            Ok((Word::Literal(rest[1..=end].to_string()), end + 2))
        }
        '(' => {
            let (call, len) = parse_group(rest)?;
            Ok((Word::Group(call), len))
        }
        c if c.is_ascii_alphabetic() || c == '_' => {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            Ok((Word::Ident(rest[..len].to_string()), len))
        }
        c if c.is_ascii_digit() || (c == '-' && next_is_digit) => {
            let len = 1 + rest[1..]
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len() - 1);
            Ok((Word::Literal(rest[..len].to_string()), len))
        }
        other => Err(Error::template(format!("unexpected {other:?} in action"))),
    }
}

fn build_call(words: Vec<Word>) -> Result<Call> {
    let mut words = words.into_iter();
    let func = match words.next() {
        Some(Word::Ident(name)) => name,
        Some(Word::Literal(value)) => {
            return Err(Error::template(format!(
                "action must start with a function name, found {}",
                quote(&value)
            )));
        }
        Some(Word::Group(_)) => {
            return Err(Error::template("action must start with a function name"));
        }
        None => return Err(Error::template("empty action")),
    };
    let args = words
        .map(|word| match word {
            Word::Literal(value) => Ok(Arg::Literal(value)),
            Word::Group(call) => Ok(Arg::Call(call)),
            Word::Ident(name) => Err(Error::template(format!(
                "unsupported argument {name} in call to {func}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Call { func, args })
}

fn lex_quoted(rest: &str) -> Result<(String, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, i + 1)),
            '\\' => match chars.next().map(|(_, e)| e) {
                Some('"') => value.push('"'),
                Some('\\') => value.push('\\'),
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some(e) => {
                    return Err(Error::template(format!("unknown escape \\{e}")));
                }
                None => break,
            },
            '\n' => break,
            c => value.push(c),
        }
    }
    Err(Error::template("unterminated string"))
}

// ============================================================================
// Evaluator
// ============================================================================

/// Two-phase template evaluator
pub struct Evaluator {
    funcs: BTreeMap<String, TemplateFn>,
    env: EnvLookup,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Evaluator reading the process environment
    pub fn new() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// Evaluator with a custom environment lookup
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            funcs: BTreeMap::new(),
            env: Arc::new(lookup),
        }
    }

    /// Register a function for the second pass
    ///
    /// Builtin names and names registered earlier are rejected.
    pub fn register(&mut self, name: &str, func: TemplateFn) -> Result<()> {
        if !is_identifier(name) {
            return Err(Error::template(format!("invalid function name {name:?}")));
        }
        if BUILTINS.contains(&name) || self.funcs.contains_key(name) {
            return Err(Error::template(format!("function {name} is already defined")));
        }
        debug!("registered template function {name}");
        self.funcs.insert(name.to_string(), func);
        Ok(())
    }

    /// Check whether a function is available
    pub fn is_registered(&self, name: &str) -> bool {
        BUILTINS.contains(&name) || self.funcs.contains_key(name)
    }

    /// Resolve builtins, defer everything else
    ///
    /// Sub-expressions are resolved first, so `{{ tfstate (env "KEY") }}`
    /// defers a `tfstate` call whose argument is already the value of `KEY`.
    pub fn first_pass(&self, src: &str) -> Result<String> {
        self.render(&parse(src)?, false)
    }

    /// Rewrite deferred call tokens back into template actions
    pub fn recover(src: &str) -> String {
        TOKEN_RE
            .replace_all(src, |caps: &Captures<'_>| match Deferred::from_captures(caps) {
                Some(call @ Deferred::Call { .. }) => call.to_template(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Recover deferred calls and render them with the registered functions
    ///
    /// A failing function is fatal. Calls to functions that are still not
    /// registered stay deferred, and so does any call with a deferred argument.
    pub fn second_pass(&self, src: &str) -> Result<String> {
        self.render(&parse(&Self::recover(src))?, true)
    }

    fn render(&self, nodes: &[Node], registered: bool) -> Result<String> {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(call) => out.push_str(&self.eval(call, registered)?),
            }
        }
        Ok(out)
    }

    /// Evaluate a call, innermost sub-expressions first
    fn eval(&self, call: &Call, registered: bool) -> Result<String> {
        let args = call
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(value) => Ok(value.clone()),
                Arg::Call(inner) => self.eval(inner, registered),
            })
            .collect::<Result<Vec<_>>>()?;
        let func = call.func.as_str();

        if args.iter().any(|arg| TOKEN_RE.is_match(arg)) {
            return Ok(Deferred::call(func, &args).token());
        }
        if let Some(result) = self.builtin(func, &args) {
            return result;
        }
        match self.funcs.get(func) {
            Some(f) if registered => {
                f(args.as_slice()).map_err(|err| Error::template(format!("{func}: {err}")))
            }
            _ => Ok(Deferred::call(func, &args).token()),
        }
    }

    fn builtin(&self, func: &str, args: &[String]) -> Option<Result<String>> {
        match func {
            "env" => Some(self.env(args)),
            "must_env" => Some(self.must_env(args)),
            _ => None,
        }
    }

    /// First non-empty variable among `keys`, else the last key itself
    fn env(&self, keys: &[String]) -> Result<String> {
        let Some(last) = keys.last() else {
            return Err(Error::template("env requires at least one argument"));
        };
        for key in keys {
            if let Some(value) = (self.env)(key.as_str())
                && !value.is_empty()
            {
                return Ok(value);
            }
        }
        Ok(last.clone())
    }

    fn must_env(&self, args: &[String]) -> Result<String> {
        match args {
            [key] => Ok((self.env)(key.as_str()).unwrap_or_else(|| Deferred::Env(key.clone()).token())),
            _ => Err(Error::template("must_env requires exactly one argument")),
        }
    }
}
