//! optimizer::splice
//!
//! In-place source replacement with indentation and index bookkeeping.
//!
//! # Contract
//!
//! Splicing replaces the full lines `[line_start, line_end]` (1-based,
//! inclusive) of a file with replacement text whose every line is
//! prefixed with the exact indentation of the original `line_start`.
//! When the replacement changes the line count, later sites in the same
//! file are shifted by the delta via [`reindex_sites`].

use crate::core::context::QuerySite;

/// Leading whitespace of `line` (1-based) in `content`.
pub fn indent_of_line(content: &str, line: usize) -> String {
    content
        .lines()
        .nth(line.saturating_sub(1))
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).collect())
        .unwrap_or_default()
}

/// Replace lines `[line_start, line_end]` of `content` with
/// `replacement`, prefixing every replacement line with `indent`.
///
/// `replacement` is expected **without** the indent prefix; blank
/// replacement lines stay blank rather than carrying trailing
/// whitespace. A trailing newline on the original content is preserved.
pub fn splice_lines(
    content: &str,
    line_start: usize,
    line_end: usize,
    replacement: &str,
    indent: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let had_trailing_newline = content.ends_with('\n');

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.extend(lines[..line_start - 1].iter().map(|l| l.to_string()));
    for repl_line in replacement.lines() {
        if repl_line.is_empty() {
            out.push(String::new());
        } else {
            out.push(format!("{}{}", indent, repl_line));
        }
    }
    out.extend(lines[line_end..].iter().map(|l| l.to_string()));

    let mut result = out.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    result
}

/// Strip `indent` from the front of every line that carries it.
///
/// Inverse of the prefixing done by [`splice_lines`], used to rebuild a
/// site slice before substituting the chosen query.
pub fn deindent(text: &str, indent: &str) -> String {
    text.lines()
        .map(|l| l.strip_prefix(indent).unwrap_or(l))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shift `line_start`/`line_end` of later sites in the same file by
/// `delta` lines. Sites at or before `after_line` are untouched.
pub fn reindex_sites(sites: &mut [QuerySite], file: &std::path::Path, after_line: usize, delta: i64) {
    if delta == 0 {
        return;
    }
    for site in sites.iter_mut() {
        if site.file_path == file && site.line_start > after_line {
            site.line_start = shift(site.line_start, delta);
            site.line_end = shift(site.line_end, delta);
        }
    }
}

fn shift(line: usize, delta: i64) -> usize {
    let shifted = line as i64 + delta;
    shifted.max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    const FILE: &str = "\
import db

def fetch(conn):
    q = \"SELECT * FROM users\"
    return conn.execute(q)
";

    #[test]
    fn indent_detection() {
        assert_eq!(indent_of_line(FILE, 4), "    ");
        assert_eq!(indent_of_line(FILE, 1), "");
        assert_eq!(indent_of_line("\tx = 1\n", 1), "\t");
    }

    #[test]
    fn single_line_replacement_preserves_indent() {
        let out = splice_lines(FILE, 4, 4, "q = \"SELECT id FROM users\"", "    ");
        assert!(out.contains("    q = \"SELECT id FROM users\""));
        assert!(!out.contains("SELECT * FROM users"));
        // Surrounding lines untouched.
        assert!(out.starts_with("import db\n"));
        assert!(out.ends_with("    return conn.execute(q)\n"));
    }

    #[test]
    fn replacement_with_more_lines() {
        let out = splice_lines(FILE, 4, 4, "q = (\"SELECT id\"\n     \"FROM users\")", "    ");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[3], "    q = (\"SELECT id\"");
        assert_eq!(lines[4], "         \"FROM users\")");
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn multi_line_range_collapsed() {
        let content = "a\nb\nc\nd\n";
        let out = splice_lines(content, 2, 3, "x", "");
        assert_eq!(out, "a\nx\nd\n");
    }

    #[test]
    fn trailing_newline_preserved_and_absent() {
        let out = splice_lines("a\nb", 2, 2, "c", "");
        assert_eq!(out, "a\nc");
        let out = splice_lines("a\nb\n", 2, 2, "c", "");
        assert_eq!(out, "a\nc\n");
    }

    #[test]
    fn splice_of_identical_text_is_byte_identical() {
        let indent = indent_of_line(FILE, 4);
        let original_slice = "    q = \"SELECT * FROM users\"";
        let bare = deindent(original_slice, &indent);
        let out = splice_lines(FILE, 4, 4, &bare, &indent);
        assert_eq!(out, FILE);
    }

    #[test]
    fn deindent_strips_only_the_prefix() {
        assert_eq!(deindent("    a\n        b", "    "), "a\n    b");
        assert_eq!(deindent("a\n    b", "    "), "a\nb");
    }

    fn site(file: &str, start: usize, end: usize) -> QuerySite {
        QuerySite {
            file_path: PathBuf::from(file),
            symbol: "f".to_string(),
            line_start: start,
            line_end: end,
            original_text: String::new(),
            dialect: "postgresql".to_string(),
            referenced_tables: vec![],
        }
    }

    #[test]
    fn reindex_shifts_only_later_sites_in_same_file() {
        let mut sites = vec![
            site("/hub/a.py", 10, 10),
            site("/hub/a.py", 25, 26),
            site("/hub/b.py", 30, 30),
        ];
        reindex_sites(&mut sites, Path::new("/hub/a.py"), 10, 2);

        assert_eq!(sites[0].line_start, 10);
        assert_eq!(sites[1].line_start, 27);
        assert_eq!(sites[1].line_end, 28);
        assert_eq!(sites[2].line_start, 30);
    }

    #[test]
    fn reindex_negative_delta() {
        let mut sites = vec![site("/hub/a.py", 20, 21)];
        reindex_sites(&mut sites, Path::new("/hub/a.py"), 5, -3);
        assert_eq!(sites[0].line_start, 17);
        assert_eq!(sites[0].line_end, 18);
    }

    #[test]
    fn reindex_zero_delta_is_noop() {
        let mut sites = vec![site("/hub/a.py", 20, 21)];
        reindex_sites(&mut sites, Path::new("/hub/a.py"), 5, 0);
        assert_eq!(sites[0].line_start, 20);
    }
}
