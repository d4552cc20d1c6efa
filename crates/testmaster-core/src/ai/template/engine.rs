//! Prompt template engine.
//!
//! Templates are scanned into tokens, assembled into a flat AST of
//! [`Node`]s, and evaluated against a JSON variable map.
//!
//! Supported syntax:
//!
//! ```text
//! {{name}}                    substitute a variable
//! {{#if name}}...{{/if}}      emit the body iff `name` is truthy
//! ```
//!
//! Conditionals do not nest. Inside a conditional body an inner
//! `{{#if ...}}` is kept as literal text and the first `{{/if}}` closes the
//! open block. An unterminated `{{#if}}` or a stray `{{/if}}` is kept as
//! literal text. Unresolved variables stay in the output verbatim.
//! Rendering never fails.

use serde_json::Value;

/// Variables available to a template.
pub type Variables = serde_json::Map<String, Value>;

/// A parsed template element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    Literal(&'a str),
    /// `raw` is the full `{{...}}` text, emitted when the variable is unset.
    Variable { name: &'a str, raw: &'a str },
    Conditional { name: &'a str, body: Vec<Node<'a>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Var { name: &'a str, raw: &'a str },
    IfOpen { name: &'a str, raw: &'a str },
    IfClose { raw: &'a str },
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn classify(raw: &str) -> Token<'_> {
    // `raw` includes the braces.
    let inner = raw[2..raw.len() - 2].trim();
    if inner == "/if" {
        return Token::IfClose { raw };
    }
    if let Some(rest) = inner.strip_prefix("#if") {
        let name = rest.trim();
        if rest.starts_with(char::is_whitespace) && is_identifier(name) {
            return Token::IfOpen { name, raw };
        }
        return Token::Text(raw);
    }
    if is_identifier(inner) {
        Token::Var { name: inner, raw }
    } else {
        Token::Text(raw)
    }
}

fn tokenize(src: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = src;

    while let Some(open) = rest.find("{{") {
        let Some(close_rel) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close_rel + 2;
        if open > 0 {
            tokens.push(Token::Text(&rest[..open]));
        }
        tokens.push(classify(&rest[open..close]));
        rest = &rest[close..];
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    tokens
}

/// Parse a template into its AST. Never fails: malformed constructs become
/// literals.
pub fn parse(src: &str) -> Vec<Node<'_>> {
    let tokens = tokenize(src);
    let mut nodes = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            Token::Text(t) => nodes.push(Node::Literal(t)),
            Token::Var { name, raw } => nodes.push(Node::Variable { name, raw }),
            Token::IfClose { raw } => nodes.push(Node::Literal(raw)),
            Token::IfOpen { name, raw } => {
                let mut body = Vec::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < tokens.len() {
                    match tokens[j] {
                        Token::Text(t) => body.push(Node::Literal(t)),
                        Token::Var { name, raw } => body.push(Node::Variable { name, raw }),
                        Token::IfOpen { raw, .. } => body.push(Node::Literal(raw)),
                        Token::IfClose { .. } => {
                            closed = true;
                            break;
                        }
                    }
                    j += 1;
                }
                if closed {
                    nodes.push(Node::Conditional { name, body });
                    i = j;
                } else {
                    // Unterminated: the opening tag is text, the rest is
                    // processed as top-level content.
                    nodes.push(Node::Literal(raw));
                }
            }
        }
        i += 1;
    }
    nodes
}

/// Truthiness used by `{{#if}}`: missing, `null`, `false`, `0`, `""`, `[]`
/// and `{}` are false.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn stringify(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

fn render_nodes(nodes: &[Node<'_>], vars: &Variables, out: &mut String) {
    for node in nodes {
        match node {
            Node::Literal(t) => out.push_str(t),
            Node::Variable { name, raw } => match vars.get(*name) {
                Some(v) => stringify(v, out),
                None => out.push_str(raw),
            },
            Node::Conditional { name, body } => {
                if is_truthy(vars.get(*name)) {
                    render_nodes(body, vars, out);
                }
            }
        }
    }
}

/// Render a template string against `vars`.
pub fn render(src: &str, vars: &Variables) -> String {
    let nodes = parse(src);
    let mut out = String::with_capacity(src.len());
    render_nodes(&nodes, vars, &mut out);
    out
}

/// Names of every variable a template references (substitutions and
/// conditions), in first-seen order without duplicates.
pub fn referenced_variables(src: &str) -> Vec<String> {
    fn collect(nodes: &[Node<'_>], names: &mut Vec<String>) {
        for node in nodes {
            match node {
                Node::Literal(_) => {}
                Node::Variable { name, .. } => push_unique(names, name),
                Node::Conditional { name, body } => {
                    push_unique(names, name);
                    collect(body, names);
                }
            }
        }
    }
    fn push_unique(names: &mut Vec<String>, name: &str) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    let mut names = Vec::new();
    collect(&parse(src), &mut names);
    names
}
