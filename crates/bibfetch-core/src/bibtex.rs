use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{CoreError, Result};
use crate::models::BibRecord;

// ─── Store ───────────────────────────────────────────────────────────────────

/// Reads and writes collections of [`BibRecord`]s as BibTeX files.
pub struct BibtexStore;

/// A parsed BibTeX file.
///
/// `@preamble`, `@string` and `@comment` blocks are kept verbatim in `blocks`
/// so rewriting the file does not drop them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibtexDocument {
    pub blocks: Vec<String>,
    pub records: Vec<BibRecord>,
}

/// What a [`BibtexStore::save`] call actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub written: usize,
    /// `(index, reason)` for every record left out of the file.
    pub rejected: Vec<(usize, String)>,
}

impl BibtexStore {
    /// Load a BibTeX file. Never writes to `path`.
    pub fn load(path: &Path) -> Result<BibtexDocument> {
        let contents = fs::read_to_string(path)?;
        parse_document(&contents)
    }

    /// Write `records` to `path` in one go.
    ///
    /// The text goes to a hidden sibling file first and is renamed over
    /// `path`, so readers never observe a half-written bibliography.
    /// Records that cannot be rendered are skipped and reported.
    pub fn save(path: &Path, records: &[BibRecord]) -> Result<SaveSummary> {
        write_atomically(path, &[], records)
    }

    /// Like [`BibtexStore::save`], with the document's blocks ahead of its entries.
    pub fn save_document(path: &Path, document: &BibtexDocument) -> Result<SaveSummary> {
        write_atomically(path, &document.blocks, &document.records)
    }
}

fn write_atomically(path: &Path, blocks: &[String], records: &[BibRecord]) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    let mut out = String::new();
    for block in blocks {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(block.trim());
        out.push('\n');
    }
    for (index, record) in records.iter().enumerate() {
        match render_record(record) {
            Ok(text) => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&text);
                summary.written += 1;
            }
            Err(err) => summary.rejected.push((index, err.to_string())),
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::Config(format!("not a file path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, out)?;
    fs::rename(&tmp, path)?;
    Ok(summary)
}

/// `dir/references_YYYYmmdd-HHMMSS.bib`, used for ad-hoc batch output.
pub fn timestamped_bib_path(dir: &Path, now: NaiveDateTime) -> PathBuf {
    dir.join(format!("references_{}.bib", now.format("%Y%m%d-%H%M%S")))
}

// ─── Writer ──────────────────────────────────────────────────────────────────

const RESERVED_TYPES: &[&str] = &["comment", "preamble", "string"];

/// Render one record as a BibTeX entry.
///
/// Values are written verbatim inside braces, bare macro expressions as they
/// were read. Every citation key the reader accepts can be written back.
pub fn render_record(record: &BibRecord) -> Result<String> {
    let label = record.label();
    if !record.is_serializable() {
        return Err(CoreError::InvalidRecord(format!(
            "{label}: missing entry type or citation key"
        )));
    }
    let entry_type = record.entry_type.trim_ascii();
    let key = record.citation_key.trim_ascii();
    if !is_identifier(entry_type)
        || RESERVED_TYPES
            .iter()
            .any(|r| entry_type.eq_ignore_ascii_case(r))
    {
        return Err(CoreError::InvalidRecord(format!(
            "{label}: `{entry_type}` is not a usable entry type"
        )));
    }
    let (open, close) = key_delimiters(key).ok_or_else(|| {
        CoreError::InvalidRecord(format!(
            "{label}: citation key must not contain spaces or commas"
        ))
    })?;

    let mut bib = format!("@{entry_type}{open}{key},\n");
    for field in record.raw_fields() {
        let name = &field.name;
        if !is_identifier(name) {
            return Err(CoreError::InvalidRecord(format!(
                "{label}: `{name}` is not a valid field name"
            )));
        }
        if !braces_balanced(&field.value) {
            return Err(CoreError::InvalidRecord(format!(
                "{label}: field `{name}` has unbalanced braces"
            )));
        }
        if field.bare && !field.value.trim().is_empty() {
            bib.push_str(&format!("  {name} = {},\n", field.value.trim()));
        } else {
            bib.push_str(&format!("  {name} = {{{}}},\n", field.value));
        }
    }
    bib.push(close);
    bib.push('\n');
    Ok(bib)
}

/// Braces unless the key itself holds a `}`, then parentheses.
fn key_delimiters(key: &str) -> Option<(char, char)> {
    if key.is_empty() || key.bytes().any(|b| b.is_ascii_whitespace() || b == b',') {
        return None;
    }
    if !key.contains('}') {
        Some(('{', '}'))
    } else if !key.contains(')') {
        Some(('(', ')'))
    } else {
        None
    }
}

fn is_identifier_byte(b: u8) -> bool {
    !b.is_ascii_whitespace()
        && !matches!(b, b'{' | b'}' | b'(' | b')' | b',' | b'=' | b'#' | b'"' | b'@')
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_identifier_byte)
}

fn braces_balanced(value: &str) -> bool {
    let mut depth = 0i32;
    for c in value.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Parse BibTeX text into records, dropping everything but the entries.
pub fn parse_bibtex(src: &str) -> Result<Vec<BibRecord>> {
    parse_document(src).map(|doc| doc.records)
}

/// Parse BibTeX text into its entries and non-entry blocks.
///
/// `@string` macros are expanded; a value that uses a macro with no
/// definition is kept as its source expression and marked bare. Anything
/// outside an `@` block is ignored. Field names are lowercased; entry types,
/// citation keys and values are kept as written.
pub fn parse_document(src: &str) -> Result<BibtexDocument> {
    let mut scanner = Scanner { src, pos: 0 };
    let mut strings: HashMap<String, Value> = HashMap::new();
    let mut document = BibtexDocument::default();

    while let Some(offset) = src[scanner.pos..].find('@') {
        let block_start = scanner.pos + offset;
        scanner.pos = block_start + 1;
        scanner.skip_ws();
        let kind = scanner.identifier();
        if kind.is_empty() {
            return Err(scanner.error("missing entry type after `@`"));
        }
        scanner.skip_ws();
        let close = match scanner.peek() {
            Some(b'{') => b'}',
            Some(b'(') => b')',
            _ if kind.eq_ignore_ascii_case("comment") => continue,
            _ => return Err(scanner.error(&format!("expected `{{` or `(` after @{kind}"))),
        };
        scanner.pos += 1;

        match kind.to_ascii_lowercase().as_str() {
            "comment" => scanner.skip_block(close)?,
            "preamble" => {
                scanner.skip_ws();
                scanner.value(&strings)?;
                scanner.skip_ws();
                scanner.expect(close)?;
            }
            "string" => {
                scanner.skip_ws();
                let name = scanner.identifier().to_ascii_lowercase();
                if name.is_empty() {
                    return Err(scanner.error("expected macro name in @string"));
                }
                scanner.skip_ws();
                scanner.expect(b'=')?;
                let value = scanner.value(&strings)?;
                scanner.skip_ws();
                scanner.expect(close)?;
                strings.insert(name, value);
            }
            _ => {
                document
                    .records
                    .push(scanner.entry(kind, close, &strings)?);
                continue;
            }
        }
        document
            .blocks
            .push(src[block_start..scanner.pos].to_string());
    }

    Ok(document)
}

/// A parsed field value.
#[derive(Debug, Clone)]
struct Value {
    text: String,
    /// Depends on a macro with no definition; `text` is the source expression.
    bare: bool,
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn line(&self) -> usize {
        self.src[..self.pos].matches('\n').count() + 1
    }

    fn error(&self, message: &str) -> CoreError {
        CoreError::Bibtex {
            line: self.line(),
            message: message.to_string(),
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(self.error(&format!(
                "expected `{}`, found `{}`",
                byte as char, b as char
            ))),
            None => Err(self.error(&format!("expected `{}`, found end of input", byte as char))),
        }
    }

    fn take_while(&mut self, keep: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&keep) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn identifier(&mut self) -> &'a str {
        self.take_while(is_identifier_byte)
    }

    fn entry(
        &mut self,
        entry_type: &str,
        close: u8,
        strings: &HashMap<String, Value>,
    ) -> Result<BibRecord> {
        self.skip_ws();
        let key = self.take_while(|b| !b.is_ascii_whitespace() && b != b',' && b != close);
        if key.is_empty() {
            return Err(self.error(&format!("missing citation key in @{entry_type}")));
        }
        let mut record = BibRecord::new(entry_type, key);

        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    return Err(self.error(&format!("unterminated entry `{key}`")));
                }
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(record);
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                Some(_) => {}
            }

            let name = self.identifier();
            if name.is_empty() {
                return Err(self.error(&format!("expected field name in entry `{key}`")));
            }
            self.skip_ws();
            self.expect(b'=')?;
            let value = self.value(strings)?;
            if value.bare {
                record.set_bare(name, value.text);
            } else {
                record.set(name, value.text);
            }

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b) if b == close => {}
                _ => {
                    return Err(self.error(&format!(
                        "expected `,` or end of entry after field `{name}`"
                    )));
                }
            }
        }
    }

    /// A field value: braced or quoted pieces, numbers and macros joined by `#`.
    fn value(&mut self, strings: &HashMap<String, Value>) -> Result<Value> {
        let mut out = String::new();
        let mut bare = false;
        self.skip_ws();
        let start = self.pos;
        let end = loop {
            self.skip_ws();
            match self.peek() {
                Some(b'{') => {
                    self.pos += 1;
                    out.push_str(self.delimited(b'}')?);
                }
                Some(b'"') => {
                    self.pos += 1;
                    out.push_str(self.delimited(b'"')?);
                }
                Some(b) if b.is_ascii_digit() => {
                    out.push_str(self.take_while(|b| b.is_ascii_alphanumeric()));
                }
                Some(_) => {
                    let name = self.identifier();
                    if name.is_empty() {
                        return Err(self.error("expected field value"));
                    }
                    match strings.get(&name.to_ascii_lowercase()) {
                        Some(expanded) => {
                            out.push_str(&expanded.text);
                            bare |= expanded.bare;
                        }
                        None => {
                            out.push_str(name);
                            bare = true;
                        }
                    }
                }
                None => return Err(self.error("expected field value, found end of input")),
            }
            let piece_end = self.pos;
            self.skip_ws();
            if self.peek() == Some(b'#') {
                self.pos += 1;
            } else {
                break piece_end;
            }
        };

        let text = if bare {
            self.src[start..end].to_string()
        } else {
            out
        };
        Ok(Value { text, bare })
    }

    /// Text up to `end` at brace depth zero; the opening delimiter is already consumed.
    fn delimited(&mut self, end: u8) -> Result<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(b) = self.peek() {
            match b {
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                _ if b == end && depth == 0 => {
                    let text = &self.src[start..self.pos];
                    self.pos += 1;
                    return Ok(text);
                }
                b'}' => return Err(self.error("unbalanced `}` in value")),
                _ => {}
            }
            self.pos += 1;
        }
        self.pos = start;
        Err(self.error("unterminated value"))
    }

    fn skip_block(&mut self, close: u8) -> Result<()> {
        let open = if close == b'}' { b'{' } else { b'(' };
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(b) = self.peek() {
            self.pos += 1;
            if b == open {
                depth += 1;
            } else if b == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        self.pos = start;
        Err(self.error("unterminated @comment"))
    }
}
