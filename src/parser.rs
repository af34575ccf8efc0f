//! Identity metadata for Python source artifacts.
//!
//! [`parse`] runs tree-sitter over the text and describes the first
//! top-level function definition (decorated and `async` definitions
//! included). Nothing is executed. Text without a function, or text that
//! does not parse cleanly, yields [`ArtifactMetadata`] with every field
//! absent.
//!
//! The signature is the function name followed by its ordinary parameter
//! names: positional-only parameters (before `/`) and keyword-only
//! parameters (after `*` or `*args`) are left out, as are `*args` and
//! `**kwargs` themselves.
//!
//! ```
//! use skill_memory::parser::parse;
//!
//! let meta = parse("def add_two(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n");
//! assert_eq!(meta.name.as_deref(), Some("add_two"));
//! assert_eq!(meta.signature.as_deref(), Some("add_two(a, b)"));
//! assert_eq!(meta.docstring.as_deref(), Some("Add two numbers."));
//! ```

use tree_sitter::{Node, Parser};

use crate::models::{ArtifactMetadata, CodeArtifact};

/// Describe the first top-level function in `source_text`.
pub fn parse(source_text: &str) -> ArtifactMetadata {
    let mut parser = Parser::new();
    if parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .is_err()
    {
        return ArtifactMetadata::default();
    }

    let tree = match parser.parse(source_text, None) {
        Some(t) => t,
        None => return ArtifactMetadata::default(),
    };
    let root = tree.root_node();
    if root.has_error() {
        return ArtifactMetadata::default();
    }

    match first_function(root) {
        Some(func) => describe(func, source_text),
        None => ArtifactMetadata::default(),
    }
}

/// Build a [`CodeArtifact`] for `source_text`, filling in whatever
/// metadata [`parse`] finds.
pub fn parse_artifact(id: &str, source_text: &str) -> CodeArtifact {
    let meta = parse(source_text);
    CodeArtifact {
        id: id.to_string(),
        source_text: source_text.to_string(),
        signature: meta.signature,
        docstring: meta.docstring,
    }
}

fn first_function(root: Node) -> Option<Node> {
    let mut cursor = root.walk();
    let found = root.named_children(&mut cursor).find_map(|child| match child.kind() {
        "function_definition" => Some(child),
        "decorated_definition" => child
            .child_by_field_name("definition")
            .filter(|def| def.kind() == "function_definition"),
        _ => None,
    });
    found
}

fn describe(func: Node, source: &str) -> ArtifactMetadata {
    let name = func
        .child_by_field_name("name")
        .map(|n| node_text(n, source).to_string());

    let signature = name.as_ref().map(|name| {
        let params = func
            .child_by_field_name("parameters")
            .map(|p| parameter_names(p, source))
            .unwrap_or_default();
        format!("{}({})", name, params.join(", "))
    });

    let docstring = func
        .child_by_field_name("body")
        .and_then(|body| docstring(body, source));

    ArtifactMetadata {
        name,
        signature,
        docstring,
    }
}

fn parameter_names(params: Node, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "identifier" => names.push(node_text(param, source).to_string()),
            "default_parameter" | "typed_default_parameter" => {
                if let Some(n) = param.child_by_field_name("name") {
                    names.push(node_text(n, source).to_string());
                }
            }
            "typed_parameter" => {
                let mut inner = param.walk();
                let first = param.named_children(&mut inner).next();
                match first {
                    Some(n) if n.kind() == "identifier" => {
                        names.push(node_text(n, source).to_string())
                    }
                    // `*args: int` ends the ordinary parameters
                    Some(n) if n.kind() == "list_splat_pattern" => break,
                    _ => {}
                }
            }
            "positional_separator" => names.clear(),
            "keyword_separator" | "list_splat_pattern" => break,
            _ => {}
        }
    }
    names
}

fn docstring(body: Node, source: &str) -> Option<String> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let mut inner = first.walk();
    let expr = first.named_children(&mut inner).next()?;
    let value = match expr.kind() {
        "string" => string_value(node_text(expr, source))?,
        // Adjacent literals: "abc" 'def'
        "concatenated_string" => {
            let mut parts = expr.walk();
            let pieces: Option<Vec<String>> = expr
                .named_children(&mut parts)
                .filter(|n| n.kind() == "string")
                .map(|n| string_value(node_text(n, source)))
                .collect();
            pieces?.concat()
        }
        _ => return None,
    };
    Some(cleandoc(&value))
}

/// The value of a plain string literal: prefix and quotes stripped, escapes
/// decoded unless the literal is raw. Byte and f-strings are not docstrings.
fn string_value(literal: &str) -> Option<String> {
    let quote_at = literal.find(['"', '\''])?;
    let prefix = literal[..quote_at].to_ascii_lowercase();
    if prefix.contains('b') || prefix.contains('f') {
        return None;
    }
    let rest = &literal[quote_at..];
    let body = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|q| rest.len() >= 2 * q.len() && rest.starts_with(*q) && rest.ends_with(*q))
        .map(|q| &rest[q.len()..rest.len() - q.len()])?;
    if prefix.contains('r') {
        Some(body.to_string())
    } else {
        Some(decode_escapes(body))
    }
}

/// Decode backslash escapes. Unknown escapes, and `\N{...}` names, are kept
/// verbatim.
fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let mut digits = String::from(next);
                while digits.len() < 3 {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                let code = u32::from_str_radix(&digits, 8).unwrap_or(0);
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut digits = String::new();
                while digits.len() < width {
                    match chars.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(ch) if digits.len() == width => out.push(ch),
                    _ => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&digits);
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

/// Normalise docstring indentation: the first line is stripped, the
/// common indent of the remaining lines is removed, and leading and
/// trailing blank lines are dropped.
fn cleandoc(raw: &str) -> String {
    let expanded = raw.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let indent = lines[1..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_spaces(l))
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    cleaned.push(lines[0].trim_start().to_string());
    for line in &lines[1..] {
        let cut = indent.min(leading_spaces(line));
        cleaned.push(line[cut..].trim_end().to_string());
    }

    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n").trim_end().to_string()
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.byte_range()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_function_is_absent() {
        let meta = parse("x = 1\n");
        assert!(meta.is_absent());
    }

    #[test]
    fn test_invalid_syntax_is_absent() {
        assert!(parse("def broken(:\n    pass").is_absent());
        assert!(parse("").is_absent());
    }

    #[test]
    fn test_simple_function() {
        let meta = parse("def add_two(a, b): return a + b");
        assert_eq!(meta.name.as_deref(), Some("add_two"));
        assert_eq!(meta.signature.as_deref(), Some("add_two(a, b)"));
        assert_eq!(meta.docstring, None);
    }

    #[test]
    fn test_only_first_top_level_function() {
        let src = "import os\n\nclass Helper:\n    def method(self):\n        pass\n\ndef first(x):\n    def inner(y):\n        pass\n    return x\n\ndef second(z):\n    pass\n";
        let meta = parse(src);
        assert_eq!(meta.name.as_deref(), Some("first"));
        assert_eq!(meta.signature.as_deref(), Some("first(x)"));
    }

    #[test]
    fn test_parameter_kinds() {
        let src = "def f(a, b: int, c=1, d: str = 'x', *args, e, **kwargs):\n    pass\n";
        assert_eq!(parse(src).signature.as_deref(), Some("f(a, b, c, d)"));

        let src = "def g(p, /, q, *, r):\n    pass\n";
        assert_eq!(parse(src).signature.as_deref(), Some("g(q)"));

        assert_eq!(parse("def h():\n    pass\n").signature.as_deref(), Some("h()"));
    }

    #[test]
    fn test_decorated_and_async() {
        let src = "@cache\ndef cached(key):\n    return key\n";
        assert_eq!(parse(src).name.as_deref(), Some("cached"));

        let src = "async def fetch(url):\n    '''Fetch a URL.'''\n    return url\n";
        let meta = parse(src);
        assert_eq!(meta.name.as_deref(), Some("fetch"));
        assert_eq!(meta.docstring.as_deref(), Some("Fetch a URL."));
    }

    #[test]
    fn test_multiline_docstring_is_dedented() {
        let src = r#"def load(path):
    """Load a CSV file.

    Args:
        path: file to read
    """
    return path
"#;
        let meta = parse(src);
        assert_eq!(
            meta.docstring.as_deref(),
            Some("Load a CSV file.\n\nArgs:\n    path: file to read")
        );
    }

    #[test]
    fn test_non_string_first_statement_has_no_docstring() {
        let src = "def f(x):\n    y = 'not a docstring'\n    return y\n";
        assert_eq!(parse(src).docstring, None);

        let src = "def f(x):\n    f\"{x}\"\n";
        assert_eq!(parse(src).docstring, None);
    }

    #[test]
    fn test_docstring_escapes_are_decoded() {
        let src = "def quote():\n    \"Say \\\"hi\\\".\\nThen stop.\"\n";
        assert_eq!(
            parse(src).docstring.as_deref(),
            Some("Say \"hi\".\nThen stop.")
        );

        let src = "def path():\n    r\"C:\\new\\dir\"\n";
        assert_eq!(parse(src).docstring.as_deref(), Some("C:\\new\\dir"));

        let src = "def sym():\n    '\\x41\\u00e9\\101 \\q'\n";
        assert_eq!(parse(src).docstring.as_deref(), Some("AéA \\q"));
    }

    #[test]
    fn test_concatenated_docstring_is_joined() {
        let src = "def joined():\n    \"First part, \" 'second part.'\n    return 1\n";
        assert_eq!(
            parse(src).docstring.as_deref(),
            Some("First part, second part.")
        );

        let src = "def mixed(x):\n    \"plain \" f\"{x}\"\n";
        assert_eq!(parse(src).docstring, None);
    }

    #[test]
    fn test_parse_artifact_fills_metadata() {
        let artifact = parse_artifact("add_two", "def add_two(a, b):\n    \"Sum.\"\n    return a + b\n");
        assert_eq!(artifact.id, "add_two");
        assert_eq!(artifact.signature.as_deref(), Some("add_two(a, b)"));
        assert_eq!(artifact.docstring.as_deref(), Some("Sum."));
    }
}
