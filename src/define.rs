//! Line grammar for PHP constant definitions
//!
//! Recognizes `define('NAME', 'VALUE');` with optional whitespace between tokens.
//! Both the salt parser and the config rewriter go through [`find_defines`] so the two
//! always agree on what a definition looks like.
//!
//! Everything works on bytes. Every token of the grammar is ASCII, so a config file in
//! any ASCII-compatible encoding can be scanned and edited without decoding it.

use std::ops::Range;

/// Comment opening the generated tail of wp-config.php
pub const SENTINEL: &str = "That's all, stop editing!";

/// A single `define(...)` occurrence within a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefineMatch<'a> {
    pub name: &'a str,
    /// Value as written, escapes included
    pub value: &'a [u8],
    /// Byte range of the whole statement, `define` through `;`
    pub span: Range<usize>,
}

/// Find every definition in `line`, left to right
pub fn find_defines(line: &[u8]) -> Vec<DefineMatch<'_>> {
    let mut found = Vec::new();
    let mut from = 0;

    while let Some(offset) = find(&line[from..], b"define") {
        let start = from + offset;
        let preceded_by_ident = start > 0 && is_ident_byte(line[start - 1]);

        if !preceded_by_ident {
            if let Some(m) = match_at(line, start) {
                from = m.span.end;
                found.push(m);
                continue;
            }
        }
        from = start + "define".len();
    }

    found
}

/// Offset of the `/*` opening the `/* That's all, stop editing! */` comment
pub fn find_sentinel(line: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(offset) = find(&line[from..], b"/*") {
        let at = from + offset;
        if skip_ws(line, at + 2).starts_with(SENTINEL.as_bytes()) {
            return Some(at);
        }
        from = at + 2;
    }
    None
}

/// Tracks leading PHP comments from one line to the next
///
/// Only comments at the start of a line are recognized: `//` and `#` hide the rest of
/// the line, and a `/* ... */` block is skipped, including one that runs over several
/// lines. A line starting with `*` is taken as the continuation of a doc block. Once
/// code starts, the rest of the line counts as code.
#[derive(Debug, Default)]
pub struct CommentScanner {
    in_block: bool,
}

impl CommentScanner {
    /// Offset where code starts on `line`, or `None` when there is none
    pub fn code_start(&mut self, line: &[u8]) -> Option<usize> {
        let mut pos = 0;
        loop {
            if self.in_block {
                pos += find(&line[pos..], b"*/")? + 2;
                self.in_block = false;
            }

            let rest = skip_ws(line, pos);
            pos = line.len() - rest.len();

            if rest.is_empty() || rest.starts_with(b"//") || rest.starts_with(b"#") {
                return None;
            }
            if rest.starts_with(b"/*") {
                pos += 2;
                self.in_block = true;
            } else if rest.starts_with(b"*") {
                self.in_block = true;
            } else {
                return Some(pos);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn skip_ws(line: &[u8], from: usize) -> &[u8] {
    let mut pos = from.min(line.len());
    while pos < line.len() && line[pos].is_ascii_whitespace() {
        pos += 1;
    }
    &line[pos..]
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn match_at(line: &[u8], start: usize) -> Option<DefineMatch<'_>> {
    let mut cur = Cursor { s: line, pos: start };

    cur.expect(b"define")?;
    cur.skip_ws();
    cur.expect(b"(")?;
    cur.skip_ws();
    let name = cur.quoted()?;
    if !is_identifier(name) {
        return None;
    }
    let name = std::str::from_utf8(name).ok()?;
    cur.skip_ws();
    cur.expect(b",")?;
    cur.skip_ws();
    let value = cur.quoted()?;
    cur.skip_ws();
    cur.expect(b")")?;
    cur.skip_ws();
    cur.expect(b";")?;

    Some(DefineMatch {
        name,
        value,
        span: start..cur.pos,
    })
}

fn is_identifier(name: &[u8]) -> bool {
    match name.split_first() {
        Some((first, rest)) => {
            (first.is_ascii_alphabetic() || *first == b'_') && rest.iter().all(|b| is_ident_byte(*b))
        }
        None => false,
    }
}

struct Cursor<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.s.len() && self.s[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, token: &[u8]) -> Option<()> {
        if self.s[self.pos..].starts_with(token) {
            self.pos += token.len();
            Some(())
        } else {
            None
        }
    }

    /// Single-quoted literal; a backslash escapes the following byte
    fn quoted(&mut self) -> Option<&'a [u8]> {
        self.expect(b"'")?;
        let start = self.pos;
        while self.pos < self.s.len() {
            match self.s[self.pos] {
                b'\\' => self.pos += 2,
                b'\'' => {
                    let literal = &self.s[start..self.pos];
                    self.pos += 1;
                    return Some(literal);
                }
                _ => self.pos += 1,
            }
        }
        None
    }
}
