//! optimizer::extract
//!
//! Embedded-query mining over changed source files.
//!
//! # Heuristic
//!
//! Extraction walks the syntactic tree of each changed source file
//! (tree-sitter with the Python grammar) and identifies string literals
//! passed to configured database execution sinks (`execute`,
//! `read_sql`, ...) whose content parses as SQL. The sink set is
//! config-driven. f-strings and other dynamic constructions are
//! skipped: the optimizer can only reason about literals it can measure
//! verbatim.
//!
//! A site spans the **full source lines** of the literal, so the slice
//! `[line_start, line_end]` of the file equals `original_text` at
//! discovery time. The query itself is re-located inside the dedented
//! slice when the optimizer needs it (see [`sql_literal_in_slice`]).

use std::path::Path;

use regex::Regex;
use tree_sitter::{Node, Parser};

use crate::core::context::QuerySite;

/// A string literal located inside a slice of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralSpan {
    /// Byte offset of the literal (including any r/b prefix).
    pub start: usize,
    /// Byte offset one past the closing quote.
    pub end: usize,
    /// Byte offset of the content between the quotes.
    pub content_start: usize,
    /// Byte offset one past the content.
    pub content_end: usize,
    /// The literal's content (between the quotes), as written.
    pub content: String,
}

/// A parser for the Python grammar, or `None` if the grammar fails to
/// load (extraction then degrades to finding nothing).
fn python_parser() -> Option<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    Some(parser)
}

/// Extract every embedded query site in `content`, in source order.
pub fn extract_sites(
    file_path: &Path,
    content: &str,
    sinks: &[String],
    dialect: &str,
) -> Vec<QuerySite> {
    if sinks.is_empty() {
        return vec![];
    }
    let Some(mut parser) = python_parser() else {
        return vec![];
    };
    let Some(tree) = parser.parse(content, None) else {
        return vec![];
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut sites = Vec::new();
    collect_sites(
        tree.root_node(),
        content,
        &lines,
        sinks,
        dialect,
        file_path,
        &mut sites,
    );
    sites
}

/// Pre-order walk over the tree, so sites come out in source order.
fn collect_sites(
    node: Node,
    src: &str,
    lines: &[&str],
    sinks: &[String],
    dialect: &str,
    file_path: &Path,
    sites: &mut Vec<QuerySite>,
) {
    if node.kind() == "call" {
        if let Some(site) = site_from_call(node, src, lines, sinks, dialect, file_path) {
            sites.push(site);
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_sites(child, src, lines, sinks, dialect, file_path, sites);
    }
}

/// Build a site from a call node whose callee is a configured sink and
/// whose first string argument reads as SQL.
fn site_from_call(
    call: Node,
    src: &str,
    lines: &[&str],
    sinks: &[String],
    dialect: &str,
    file_path: &Path,
) -> Option<QuerySite> {
    let name = callee_name(call, src)?;
    if !sinks.iter().any(|sink| sink == &name) {
        return None;
    }

    let string_node = first_string_argument(call)?;
    let span = literal_span(string_node, src)?;
    if !looks_like_sql(&span.content) {
        return None;
    }

    let line_start = string_node.start_position().row + 1;
    let line_end = string_node.end_position().row + 1;
    let original_text = lines[line_start - 1..line_end].join("\n");

    Some(QuerySite {
        file_path: file_path.to_path_buf(),
        symbol: enclosing_symbol(string_node, src),
        line_start,
        line_end,
        original_text,
        dialect: dialect.to_string(),
        referenced_tables: referenced_tables(&span.content),
    })
}

/// The called name: `execute` for both `execute(...)` and
/// `conn.execute(...)`.
fn callee_name(call: Node, src: &str) -> Option<String> {
    let function = call.child_by_field_name("function")?;
    let name_node = match function.kind() {
        "identifier" => function,
        "attribute" => function.child_by_field_name("attribute")?,
        _ => return None,
    };
    Some(node_text(name_node, src).to_string())
}

/// First plain-string argument of a call.
fn first_string_argument(call: Node) -> Option<Node<'_>> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let found = args
        .named_children(&mut cursor)
        .find(|n| n.kind() == "string");
    found
}

/// Span of a static string literal. `None` for f-strings and anything
/// else whose value is not the literal text.
fn literal_span(string_node: Node, src: &str) -> Option<LiteralSpan> {
    let mut cursor = string_node.walk();
    let children: Vec<Node> = string_node.children(&mut cursor).collect();

    if children.iter().any(|c| c.kind() == "interpolation") {
        return None;
    }
    let start_tok = children.iter().find(|c| c.kind() == "string_start")?;
    let end_tok = children.iter().rev().find(|c| c.kind() == "string_end")?;
    // The opening token carries the prefix: `"` vs `f"` vs `rb'`.
    if node_text(*start_tok, src).to_ascii_lowercase().contains('f') {
        return None;
    }

    let content_start = start_tok.end_byte();
    let content_end = end_tok.start_byte();
    Some(LiteralSpan {
        start: string_node.start_byte(),
        end: string_node.end_byte(),
        content_start,
        content_end,
        content: src[content_start..content_end].to_string(),
    })
}

/// Find the first SQL-looking string literal inside a site slice.
///
/// Used at replacement time to split the slice into prefix, query, and
/// suffix. The slice must be dedented (valid standalone Python);
/// callers go through the site's dedented form. Skips non-SQL literals
/// on the same lines (log messages and the like).
pub fn sql_literal_in_slice(slice: &str) -> Option<LiteralSpan> {
    let mut parser = python_parser()?;
    let tree = parser.parse(slice, None)?;
    first_sql_string(tree.root_node(), slice)
}

fn first_sql_string(node: Node, src: &str) -> Option<LiteralSpan> {
    if node.kind() == "string" {
        if let Some(span) = literal_span(node, src) {
            if looks_like_sql(&span.content) {
                return Some(span);
            }
        }
        // A string's children hold no further strings.
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(span) = first_sql_string(child, src) {
            return Some(span);
        }
    }
    None
}

/// Whether a literal's content reads as a SQL statement.
pub fn looks_like_sql(text: &str) -> bool {
    let head = text.trim_start().to_ascii_uppercase();
    ["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"]
        .iter()
        .any(|kw| head.starts_with(kw))
}

/// Table names referenced by FROM/JOIN/INTO/UPDATE clauses, lowercased,
/// first occurrence order.
pub fn referenced_tables(query: &str) -> Vec<String> {
    let re = Regex::new(r"(?i)\b(?:FROM|JOIN|INTO|UPDATE)\s+([A-Za-z_][A-Za-z0-9_.]*)")
        .expect("static pattern");
    let mut tables = Vec::new();
    for cap in re.captures_iter(query) {
        let table = cap[1].to_ascii_lowercase();
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    tables
}

/// Nearest enclosing `def`/`class` above the node, or `<module>`.
fn enclosing_symbol(node: Node, src: &str) -> String {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if matches!(parent.kind(), "function_definition" | "class_definition") {
            if let Some(name) = parent.child_by_field_name("name") {
                return node_text(name, src).to_string();
            }
        }
        current = parent;
    }
    "<module>".to_string()
}

fn node_text<'a>(node: Node, src: &'a str) -> &'a str {
    &src[node.byte_range()]
}
