//! Static manifest extraction.
//!
//! The candidate source is parsed, never executed. Only top-level
//! assignments of string or string-list literals to the `md_*` names are
//! recorded; everything else in the file is ignored.

use std::path::Path;

use full_moon::ast::{Expression, Field, Stmt};
use full_moon::tokenizer::{StringLiteralQuoteType, TokenReference, TokenType};
use serde::Serialize;

use crate::types::{PluginError, PluginResult};

/// Statically extracted description of a plugin candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    /// Namespaced id, `lua.<module name>`.
    pub id: String,
    /// Declared interface version, `<major>.<minor>`.
    pub iid: String,
    pub version: String,
    pub name: String,
    pub description: String,
    pub license: String,
    pub url: String,
    pub readme_url: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    /// Lua packages (rocks) required at runtime.
    pub lib_dependencies: Vec<String>,
    /// Executables required on `$PATH`.
    pub bin_dependencies: Vec<String>,
    pub credits: Vec<String>,
    /// Supported platforms. Empty means all.
    pub platforms: Vec<String>,
}

/// A literal value assigned to a manifest name.
enum Literal {
    String(String),
    List(Vec<String>),
}

impl Literal {
    fn into_string(self) -> Option<String> {
        match self {
            Self::String(s) => Some(s),
            Self::List(_) => None,
        }
    }

    fn into_list(self) -> Vec<String> {
        match self {
            Self::String(s) => vec![s],
            Self::List(list) => list,
        }
    }
}

impl Manifest {
    /// Parse `source` and collect the manifest assignments.
    ///
    /// `path` is only used for error reporting.
    pub fn extract(id: &str, source: &str, path: &Path) -> PluginResult<Self> {
        let ast = full_moon::parse(source).map_err(|errors| PluginError::Parse {
            path: path.to_path_buf(),
            message: errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        })?;

        let mut manifest = Manifest {
            id: id.to_string(),
            ..Default::default()
        };

        for stmt in ast.nodes().stmts() {
            match stmt {
                Stmt::Assignment(assignment) => {
                    let names = assignment.variables().iter().map(|var| match var {
                        full_moon::ast::Var::Name(token) => Some(token.token().to_string()),
                        _ => None,
                    });
                    for (name, expr) in names.zip(assignment.expressions().iter()) {
                        if let Some(name) = name {
                            manifest.record(&name, expr);
                        }
                    }
                }
                Stmt::LocalAssignment(local) => {
                    let names = local.names().iter().map(|token| token.token().to_string());
                    for (name, expr) in names.zip(local.expressions().iter()) {
                        manifest.record(&name, expr);
                    }
                }
                _ => {}
            }
        }

        Ok(manifest)
    }

    fn record(&mut self, name: &str, expr: &Expression) {
        let field: &mut String = match name {
            "md_iid" => &mut self.iid,
            "md_version" => &mut self.version,
            "md_name" => &mut self.name,
            "md_description" => &mut self.description,
            "md_license" => &mut self.license,
            "md_url" => &mut self.url,
            "md_readme_url" => &mut self.readme_url,
            _ => {
                let list = match name {
                    "md_authors" => &mut self.authors,
                    "md_maintainers" => &mut self.maintainers,
                    "md_lib_dependencies" => &mut self.lib_dependencies,
                    "md_bin_dependencies" => &mut self.bin_dependencies,
                    "md_credits" => &mut self.credits,
                    "md_platforms" => &mut self.platforms,
                    _ => return,
                };
                if let Some(literal) = literal(expr) {
                    *list = literal.into_list();
                }
                return;
            }
        };

        if let Some(value) = literal(expr).and_then(Literal::into_string) {
            *field = value;
        }
    }
}

fn literal(expr: &Expression) -> Option<Literal> {
    match expr {
        Expression::String(token) => string_literal(token).map(Literal::String),
        Expression::TableConstructor(table) => table
            .fields()
            .iter()
            .map(|field| match field {
                Field::NoKey(Expression::String(token)) => string_literal(token),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Literal::List),
        _ => None,
    }
}

fn string_literal(token: &TokenReference) -> Option<String> {
    match token.token().token_type() {
        TokenType::StringLiteral {
            literal,
            quote_type,
            ..
        } => {
            let raw = literal.to_string();
            if matches!(quote_type, StringLiteralQuoteType::Brackets) {
                // Lua drops a newline directly after the opening bracket
                let raw = raw
                    .strip_prefix("\r\n")
                    .or_else(|| raw.strip_prefix('\n'))
                    .unwrap_or(&raw);
                Some(raw.to_string())
            } else {
                Some(unescape(&raw))
            }
        }
        _ => None,
    }
}

/// Decode the escapes of a quoted Lua string. `\ddd` and `\xXX` denote
/// bytes, so the result is decoded lossily.
fn unescape(raw: &str) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let Some(c) = chars.next() else {
            out.push(b'\\');
            break;
        };
        match c {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            '\\' | '"' | '\'' => out.push(c as u8),
            '\n' | '\r' => {
                // "\r\n" and "\n\r" count as one line break
                if matches!(chars.peek(), Some(&next) if (next == '\n' || next == '\r') && next != c) {
                    chars.next();
                }
                out.push(b'\n');
            }
            'z' => {
                while chars.next_if(|c| c.is_ascii_whitespace()).is_some() {}
            }
            'x' => {
                let hex: String = (0..2).filter_map(|_| chars.next_if(char::is_ascii_hexdigit)).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(byte) if hex.len() == 2 => out.push(byte),
                    _ => {
                        out.extend_from_slice(b"\\x");
                        out.extend_from_slice(hex.as_bytes());
                    }
                }
            }
            'u' if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = std::iter::from_fn(|| chars.next_if(char::is_ascii_hexdigit)).collect();
                let closed = chars.next_if_eq(&'}').is_some();
                let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
                match decoded {
                    Some(ch) if closed => {
                        let mut buf = [0; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    }
                    _ => out.extend_from_slice("\u{fffd}".as_bytes()),
                }
            }
            '0'..='9' => {
                let mut value = c.to_digit(10).unwrap_or(0);
                for _ in 0..2 {
                    match chars.next_if(char::is_ascii_digit) {
                        Some(d) => value = value * 10 + d.to_digit(10).unwrap_or(0),
                        None => break,
                    }
                }
                out.push(u8::try_from(value).unwrap_or(0xff));
            }
            other => {
                let mut buf = [0; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> Manifest {
        Manifest::extract("lua.test", source, Path::new("test.lua")).unwrap()
    }

    #[test]
    fn test_unescape_simple_escapes() {
        assert_eq!(unescape(r"a\tb\nc\rd"), "a\tb\nc\rd");
        assert_eq!(unescape(r"\a\b\f\v"), "\u{7}\u{8}\u{c}\u{b}");
        assert_eq!(unescape(r#"\\ \" \'"#), r#"\ " '"#);
    }

    #[test]
    fn test_unescape_line_continuations() {
        assert_eq!(unescape("one\\\ntwo"), "one\ntwo");
        assert_eq!(unescape("one\\\r\ntwo"), "one\ntwo");
        assert_eq!(unescape("a\\z\n   b"), "ab");
        assert_eq!(unescape("a\\z b"), "ab");
    }

    #[test]
    fn test_unescape_numeric_escapes() {
        assert_eq!(unescape(r"\65\x42\u{43}"), "ABC");
        assert_eq!(unescape(r"\0651"), "A1");
        assert_eq!(unescape(r"\9"), "\t");
        assert_eq!(unescape(r"\u{e9}\u{1F600}"), "é😀");
        assert_eq!(unescape(r"\xC3\xA9"), "é");
    }

    #[test]
    fn test_extracts_escaped_strings() {
        let m = extract(
            r#"
md_iid = "1.1"
md_version = "\65\x42\u{43}"
md_description = "a\z
   b"
"#,
        );
        assert_eq!(m.version, "ABC");
        assert_eq!(m.description, "ab");
    }

    #[test]
    fn test_extracts_strings_and_lists() {
        let m = extract(
            r#"
md_iid = "1.1"
md_version = '2.0'
md_name = "Test \"plugin\""
md_description = [[
Multi line]]
md_authors = {"@alice", "@bob"}
md_bin_dependencies = "fd"
local md_license = "MIT"
"#,
        );

        assert_eq!(m.id, "lua.test");
        assert_eq!(m.iid, "1.1");
        assert_eq!(m.version, "2.0");
        assert_eq!(m.name, "Test \"plugin\"");
        assert_eq!(m.description, "Multi line");
        assert_eq!(m.authors, vec!["@alice", "@bob"]);
        assert_eq!(m.bin_dependencies, vec!["fd"]);
        assert_eq!(m.license, "MIT");
    }

    #[test]
    fn test_ignores_computed_and_nested_values() {
        let m = extract(
            r#"
md_iid = "1" .. ".1"
md_name = string.upper("x")
md_authors = {"a", some_var}
function f()
    md_version = "9.9"
end
md_url, md_license = "https://example.org", "BSD"
"#,
        );

        assert_eq!(m.iid, "");
        assert_eq!(m.name, "");
        assert!(m.authors.is_empty());
        assert_eq!(m.version, "");
        assert_eq!(m.url, "https://example.org");
        assert_eq!(m.license, "BSD");
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = Manifest::extract("lua.bad", "md_iid = = 1", Path::new("bad.lua")).unwrap_err();
        assert!(matches!(err, PluginError::Parse { .. }));
        assert!(!err.is_soft_skip());
    }
}
