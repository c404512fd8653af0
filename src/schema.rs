//! Schema reader (§3.5, §4.9).
//!
//! Grounded in iteration pattern on the teacher's `stored_db.rs`, which
//! walks the root page-1 B-tree looking for a row whose `name` column
//! matches a wanted table and pulls `rootpage`/`sql` out of it with a
//! handful of column-index constants (`SCHEMA_TABLE_COL_NAMES`,
//! `SCHEMA_TABLE_COL_ROOTPAGE`, ...). This reader generalizes that
//! single-lookup scan into a full pass building every table, index,
//! and view at once, using [`crate::btree::cursor::Cursor`] instead of
//! the teacher's `StoredTable::streaming_iterator`.
//!
//! The CREATE-statement parser is new: the teacher never parses SQL
//! text itself (that job belongs to `pt_to_ast.rs`, built on the
//! `pest` grammar crate, for *query* SQL submitted by a caller). This
//! reader instead parses the handful of DDL statements that live in
//! `sqlite_schema.sql`. It mimics the shape of `pt_to_ast.rs`'s
//! `pt_create_statement_to_ast` (walk a column list, pull name/type
//! pairs, fall through constraints) without pulling in `pest`: DDL
//! text is short and the grammar is small enough that a hand-rolled
//! tokenizer is the more idiomatic choice here, matching §4.9's
//! explicit call for a "dedicated, permissive" parser.

use std::collections::HashMap;

use crate::btree::cursor::Cursor;
use crate::error::{self, Error};
use crate::pager::{PageNum, PageSource};
use crate::record::{self, ColumnValue};

/// Every SQLite database's root page; holds the `sqlite_schema` table.
pub const SCHEMA_ROOT_PAGE: PageNum = 1;

/// A merged logical column synthesised from two adjacent physical
/// `INTEGER` columns (§3.5, §4.10.2): `<Base>Hi`/`<Base>Lo` for a
/// 128-bit GUID, `<Base>DecimalHi`/`<Base>DecimalLo` for a 128-bit
/// decimal. Naming convention is this crate's own resolution of an
/// open question left unspecified by the format this schema reads
/// (see DESIGN.md); there is no on-disk marker for "this pair is
/// merged" beyond the names lining up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergedKind {
    Guid,
    Decimal,
}

#[derive(Debug, Clone)]
pub struct MergedColumn {
    pub logical_name: String,
    pub kind: MergedKind,
    pub hi_ordinal: usize,
    pub lo_ordinal: usize,
}

/// One physical column of a table (§3.5).
#[derive(Debug, Clone)]
pub struct Column {
    pub ordinal: usize,
    pub name: String,
    /// Declared type, uppercased for comparisons (§4.9).
    pub declared_type: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub has_default: bool,
    /// True when this column is the table's rowid alias: an
    /// `INTEGER PRIMARY KEY` column whose value lives in the cell's
    /// rowid varint rather than in the record body (§4.10 "Special
    /// cases").
    pub is_rowid_alias: bool,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub root_page: PageNum,
    pub sql: String,
    pub without_rowid: bool,
    pub columns: Vec<Column>,
    pub merged_columns: Vec<MergedColumn>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn rowid_alias(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_rowid_alias)
    }
}

#[derive(Debug, Clone)]
pub struct Index {
    pub name: String,
    pub root_page: PageNum,
    pub table_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct View {
    pub name: String,
    pub sql: String,
    pub referenced_tables: Vec<String>,
    /// Empty when the view selects `*` (see `is_select_all`).
    pub projection: Vec<String>,
    pub has_join: bool,
    pub has_filter: bool,
    pub is_select_all: bool,
}

/// A join- and filter-free view rewritten as a plain read of its
/// source table (§3.5 "promoted").
#[derive(Debug, Clone)]
pub struct Promotion {
    pub source_table: String,
    pub projection: Vec<String>,
}

impl View {
    /// Promotes this view into a direct table read if it has no join
    /// and no filter; `None` otherwise.
    pub fn promote(&self) -> Option<Promotion> {
        if self.has_join || self.has_filter {
            return None;
        }
        let source_table = self.referenced_tables.first()?.clone();
        Some(Promotion {
            source_table,
            projection: self.projection.clone(),
        })
    }
}

/// The full set of tables, indexes, and views found in `sqlite_schema`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub tables: HashMap<String, Table>,
    pub indexes: HashMap<String, Index>,
    pub views: HashMap<String, View>,
}

impl Schema {
    /// Walks the `sqlite_schema` table at page 1 and parses every
    /// `table`/`index`/`view` row found (§4.9).
    pub fn read<S: PageSource>(source: &S, usable_page_size: u32) -> Result<Schema, Error> {
        let mut schema = Schema::default();
        let mut cursor = Cursor::new(source, SCHEMA_ROOT_PAGE, usable_page_size);
        let mut has_row = cursor.move_first()?;
        while has_row {
            let payload = cursor.payload()?;
            let cols = record::decode_all(payload.as_slice())?;
            let kind = text_col(&cols, 0)?;
            let name = text_col(&cols, 1)?;
            let root_page = int_col(&cols, 3)? as PageNum;
            let sql = match cols.get(4) {
                Some(ColumnValue::Text(b)) => Some(
                    std::str::from_utf8(b)
                        .map_err(|_| error::corrupt("sqlite_schema.sql is not valid UTF-8"))?
                        .to_string(),
                ),
                _ => None,
            };

            match kind {
                "table" => {
                    if let Some(sql) = sql {
                        if !is_internal_schema_object(name) {
                            let table = parse_create_table(name, root_page, &sql)?;
                            schema.tables.insert(table.name.clone(), table);
                        }
                    }
                }
                "index" => {
                    // Auto-indexes created for UNIQUE/PRIMARY KEY
                    // constraints have a NULL sql column; nothing to
                    // parse, so they are skipped (they carry no
                    // column list we could otherwise report).
                    if let Some(sql) = sql {
                        if let Some(index) = parse_create_index(name, root_page, &sql)? {
                            schema.indexes.insert(index.name.clone(), index);
                        }
                    }
                }
                "view" => {
                    if let Some(sql) = sql {
                        let view = parse_create_view(name, &sql)?;
                        schema.views.insert(view.name.clone(), view);
                    }
                }
                _ => {}
            }

            has_row = cursor.move_next()?;
        }
        Ok(schema)
    }
}

fn is_internal_schema_object(name: &str) -> bool {
    name.starts_with("sqlite_")
}

fn text_col<'a>(cols: &'a [ColumnValue<'a>], idx: usize) -> Result<&'a str, Error> {
    match cols.get(idx) {
        Some(ColumnValue::Text(b)) => {
            std::str::from_utf8(b).map_err(|_| error::corrupt("sqlite_schema text column is not valid UTF-8"))
        }
        _ => Err(error::corrupt("expected a TEXT column in sqlite_schema")),
    }
}

fn int_col(cols: &[ColumnValue<'_>], idx: usize) -> Result<i64, Error> {
    cols.get(idx)
        .and_then(ColumnValue::as_i64)
        .ok_or_else(|| error::corrupt("expected an INTEGER column in sqlite_schema"))
}

// --- Tokenizer -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(String),
    StringLit(String),
    Punct(u8),
}

impl<'a> Token<'a> {
    fn is_word_ci(&self, kw: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(kw))
    }

    fn name_text(&self) -> Option<&str> {
        match self {
            Token::Word(w) => Some(w),
            Token::Quoted(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut i = 0usize;
    let mut out = Vec::new();
    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if b == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            continue;
        }
        if b == b'\'' {
            let (s, next) = scan_quoted(bytes, i, b'\'');
            out.push(Token::StringLit(s));
            i = next;
            continue;
        }
        if b == b'"' {
            let (s, next) = scan_quoted(bytes, i, b'"');
            out.push(Token::Quoted(s));
            i = next;
            continue;
        }
        if b == b'`' {
            let (s, next) = scan_quoted(bytes, i, b'`');
            out.push(Token::Quoted(s));
            i = next;
            continue;
        }
        if b == b'[' {
            let start = i + 1;
            let mut j = start;
            while j < bytes.len() && bytes[j] != b']' {
                j += 1;
            }
            out.push(Token::Quoted(sql[start..j].to_string()));
            i = (j + 1).min(bytes.len());
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                i += 1;
            }
            out.push(Token::Word(&sql[start..i]));
            continue;
        }
        if b.is_ascii_digit() {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.' || bytes[i] == b'+' || bytes[i] == b'-')
            {
                i += 1;
            }
            out.push(Token::Word(&sql[start..i]));
            continue;
        }
        out.push(Token::Punct(b));
        i += 1;
    }
    out
}

/// Scans a `quote`-delimited literal starting at `start` (which points
/// at the opening quote), honoring the doubled-quote escape (`''`,
/// `""`, ```` `` ````). Returns the unescaped contents and the index
/// just past the closing quote.
fn scan_quoted(bytes: &[u8], start: usize, quote: u8) -> (String, usize) {
    let mut i = start + 1;
    let mut out = String::new();
    loop {
        if i >= bytes.len() {
            return (out, i);
        }
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                out.push(quote as char);
                i += 2;
                continue;
            }
            return (out, i + 1);
        }
        // DDL text is expected to be ASCII-safe for identifiers and
        // string literals; fall back byte-by-byte, which is sound for
        // UTF-8 as long as we never split inside a multi-byte
        // sequence. Since the only bytes we compare against are ASCII
        // quote characters, multi-byte sequences pass through whole.
        out.push(bytes[i] as char);
        i += 1;
    }
}

// --- CREATE TABLE / INDEX / VIEW parsers ------------------------------

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str) -> Self {
        Parser {
            tokens: tokenize(sql),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token<'a>> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_word_ci(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(t) if t.is_word_ci(kw)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word_ci(&mut self, kw: &str) -> Result<(), Error> {
        if self.eat_word_ci(kw) {
            Ok(())
        } else {
            Err(error::unsupported(format!("expected keyword `{kw}` in DDL text")))
        }
    }

    fn eat_punct(&mut self, p: u8) -> bool {
        if matches!(self.peek(), Some(Token::Punct(b)) if *b == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: u8) -> Result<(), Error> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(error::unsupported(format!("expected `{}` in DDL text", p as char)))
        }
    }

    /// Reads a possibly schema-qualified name (`main.foo` or `foo`),
    /// returning just the final identifier.
    fn read_name(&mut self) -> Result<String, Error> {
        let first = self
            .bump()
            .and_then(Token::name_text)
            .ok_or_else(|| error::unsupported("expected an identifier in DDL text"))?
            .to_string();
        if self.eat_punct(b'.') {
            let second = self
                .bump()
                .and_then(Token::name_text)
                .ok_or_else(|| error::unsupported("expected an identifier after `.` in DDL text"))?
                .to_string();
            return Ok(second);
        }
        Ok(first)
    }

    /// Skips tokens, tracking paren depth, until a comma or closing
    /// paren is seen at depth 0 (not consumed). Used both to discard a
    /// table-level constraint entirely and to ride out a column
    /// definition's trailing constraints.
    fn skip_to_item_boundary(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                None => return,
                Some(Token::Punct(b'(')) => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(Token::Punct(b')')) if depth == 0 => return,
                Some(Token::Punct(b)) if *b == b')' => {
                    depth -= 1;
                    self.pos += 1;
                }
                Some(Token::Punct(b',')) if depth == 0 => return,
                _ => {
                    self.pos += 1;
                }
            }
        }
    }
}

const COLUMN_CONSTRAINT_KEYWORDS: &[&str] = &[
    "NOT",
    "PRIMARY",
    "UNIQUE",
    "DEFAULT",
    "CHECK",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
    "CONSTRAINT",
];

fn is_table_constraint_start(tok: &Token<'_>) -> bool {
    matches!(tok, Token::Word(w) if ["PRIMARY", "UNIQUE", "FOREIGN", "CHECK"].iter().any(|k| w.eq_ignore_ascii_case(k)))
}

/// Parses one column definition starting at the current position
/// (just after `CONSTRAINT`-skipping), leaving the parser positioned
/// at the following top-level comma or closing paren. Returns `None`
/// if this item turned out to be a table-level constraint rather than
/// a column.
fn parse_column_def(p: &mut Parser<'_>, ordinal: usize) -> Result<Option<Column>, Error> {
    if matches!(p.peek(), Some(t) if is_table_constraint_start(t)) {
        p.skip_to_item_boundary();
        return Ok(None);
    }

    let name = p
        .bump()
        .and_then(Token::name_text)
        .ok_or_else(|| error::unsupported("expected a column name in CREATE TABLE"))?
        .to_string();

    let mut type_words: Vec<String> = Vec::new();
    let mut primary_key = false;
    let mut not_null = false;
    let mut has_default = false;
    let mut depth: i32 = 0;
    let mut seen_constraint = false;

    loop {
        match p.peek() {
            None => break,
            Some(Token::Punct(b'(')) => {
                depth += 1;
                if !seen_constraint {
                    type_words.push("(".to_string());
                }
                p.pos += 1;
            }
            Some(Token::Punct(b')')) if depth == 0 => break,
            Some(Token::Punct(b)) if *b == b')' => {
                depth -= 1;
                if !seen_constraint {
                    type_words.push(")".to_string());
                }
                p.pos += 1;
            }
            Some(Token::Punct(b',')) if depth == 0 => break,
            Some(tok) if depth == 0 && !seen_constraint && is_column_constraint_keyword(tok) => {
                match tok {
                    Token::Word(w) if w.eq_ignore_ascii_case("NOT") => {
                        p.pos += 1;
                        p.eat_word_ci("NULL");
                        not_null = true;
                    }
                    Token::Word(w) if w.eq_ignore_ascii_case("PRIMARY") => {
                        p.pos += 1;
                        p.eat_word_ci("KEY");
                        primary_key = true;
                        p.eat_word_ci("ASC");
                        p.eat_word_ci("DESC");
                        p.eat_word_ci("AUTOINCREMENT");
                    }
                    Token::Word(w) if w.eq_ignore_ascii_case("DEFAULT") => {
                        p.pos += 1;
                        has_default = true;
                        if p.eat_punct(b'(') {
                            p.pos -= 1;
                            skip_one_value(p);
                        } else {
                            skip_one_value(p);
                        }
                    }
                    _ => {
                        p.pos += 1;
                        skip_one_value(p);
                    }
                }
                seen_constraint = false; // keep scanning for more constraints
            }
            Some(_) => {
                if !seen_constraint {
                    if let Some(text) = p.peek().and_then(Token::name_text) {
                        type_words.push(text.to_string());
                    }
                }
                p.pos += 1;
            }
        }
    }

    let declared_type = type_words.join(" ").to_uppercase();
    Ok(Some(Column {
        ordinal,
        name,
        declared_type,
        primary_key,
        not_null,
        has_default,
        is_rowid_alias: false,
    }))
}

fn is_column_constraint_keyword(tok: &Token<'_>) -> bool {
    matches!(tok, Token::Word(w) if COLUMN_CONSTRAINT_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k)))
}

/// Skips one constraint's trailing value (a single token, a
/// parenthesised group, or a dotted/parenthesised reference), without
/// crossing a top-level comma or closing paren.
fn skip_one_value(p: &mut Parser<'_>) {
    if p.eat_punct(b'(') {
        let mut depth = 1i32;
        while depth > 0 {
            match p.bump() {
                None => return,
                Some(Token::Punct(b'(')) => depth += 1,
                Some(Token::Punct(b')')) => depth -= 1,
                _ => {}
            }
        }
        return;
    }
    // A single scalar token (number, string literal, NULL, CURRENT_TIMESTAMP, ...).
    p.bump();
    // Allow a dotted continuation (COLLATE foo, REFERENCES t(col)).
    while p.eat_punct(b'(') {
        let mut depth = 1i32;
        while depth > 0 {
            match p.bump() {
                None => return,
                Some(Token::Punct(b'(')) => depth += 1,
                Some(Token::Punct(b')')) => depth -= 1,
                _ => {}
            }
        }
    }
}

fn parse_create_table(expected_name: &str, root_page: PageNum, sql: &str) -> Result<Table, Error> {
    let mut p = Parser::new(sql);
    p.expect_word_ci("CREATE")?;
    p.eat_word_ci("TEMP");
    p.eat_word_ci("TEMPORARY");
    p.expect_word_ci("TABLE")?;
    if p.eat_word_ci("IF") {
        p.expect_word_ci("NOT")?;
        p.expect_word_ci("EXISTS")?;
    }
    let name = p.read_name()?;
    p.expect_punct(b'(')?;

    let mut columns = Vec::new();
    loop {
        if p.eat_punct(b')') {
            break;
        }
        p.eat_word_ci("CONSTRAINT");
        // A named table constraint (`CONSTRAINT pk PRIMARY KEY (...)`)
        // has its name immediately followed by a constraint keyword;
        // skip that name before the column-vs-constraint check below.
        let named_constraint = p.peek().and_then(Token::name_text).is_some()
            && p.tokens.get(p.pos + 1).map(is_table_constraint_start).unwrap_or(false);
        if named_constraint {
            p.pos += 1;
        }

        match parse_column_def(&mut p, columns.len())? {
            Some(col) => columns.push(col),
            None => {}
        }

        if p.eat_punct(b',') {
            continue;
        }
        p.expect_punct(b')')?;
        break;
    }

    let mut without_rowid = false;
    if p.eat_word_ci("WITHOUT") {
        p.expect_word_ci("ROWID")?;
        without_rowid = true;
    }

    if without_rowid {
        return Err(error::unsupported(format!(
            "table `{expected_name}` uses WITHOUT ROWID, which is not supported"
        )));
    }

    let pk_count = columns.iter().filter(|c| c.primary_key).count();
    if pk_count == 1 {
        if let Some(col) = columns.iter_mut().find(|c| c.primary_key) {
            let ty = col.declared_type.trim();
            if ty == "INTEGER" || ty.starts_with("INTEGER ") || ty.is_empty() {
                col.is_rowid_alias = ty == "INTEGER" || ty.starts_with("INTEGER ");
            }
        }
    }

    let merged_columns = detect_merged_columns(&columns);

    Ok(Table {
        name,
        root_page,
        sql: sql.to_string(),
        without_rowid,
        columns,
        merged_columns,
    })
}

/// Pairs up adjacent `<Base>Hi`/`<Base>Lo` and
/// `<Base>DecimalHi`/`<Base>DecimalLo` integer columns into merged
/// logical columns (§3.5, §4.10.2). See the [`MergedColumn`] doc
/// comment for the naming convention this resolves.
fn detect_merged_columns(columns: &[Column]) -> Vec<MergedColumn> {
    let mut merged = Vec::new();
    let mut used = vec![false; columns.len()];
    for i in 0..columns.len() {
        if used[i] {
            continue;
        }
        let (base, kind) = match strip_merge_suffix(&columns[i].name) {
            Some(v) => v,
            None => continue,
        };
        // Only Hi/Lo halves pair; find the matching other half.
        let is_hi = columns[i].name.to_ascii_uppercase().ends_with("HI");
        for j in (i + 1)..columns.len() {
            if used[j] {
                continue;
            }
            let Some((other_base, other_kind)) = strip_merge_suffix(&columns[j].name) else {
                continue;
            };
            if other_kind != kind || !other_base.eq_ignore_ascii_case(base) {
                continue;
            }
            let other_is_hi = columns[j].name.to_ascii_uppercase().ends_with("HI");
            if is_hi == other_is_hi {
                continue;
            }
            let (hi_idx, lo_idx) = if is_hi { (i, j) } else { (j, i) };
            used[i] = true;
            used[j] = true;
            merged.push(MergedColumn {
                logical_name: base.to_string(),
                kind,
                hi_ordinal: columns[hi_idx].ordinal,
                lo_ordinal: columns[lo_idx].ordinal,
            });
            break;
        }
    }
    merged
}

fn strip_merge_suffix(name: &str) -> Option<(&str, MergedKind)> {
    let up = name.to_ascii_uppercase();
    if let Some(rest) = up.strip_suffix("DECIMALHI").or_else(|| up.strip_suffix("DECIMALLO")) {
        return Some((&name[..rest.len()], MergedKind::Decimal));
    }
    if let Some(rest) = up.strip_suffix("HI").or_else(|| up.strip_suffix("LO")) {
        return Some((&name[..rest.len()], MergedKind::Guid));
    }
    None
}

fn parse_create_index(expected_name: &str, root_page: PageNum, sql: &str) -> Result<Option<Index>, Error> {
    let mut p = Parser::new(sql);
    p.expect_word_ci("CREATE")?;
    p.eat_word_ci("UNIQUE");
    p.expect_word_ci("INDEX")?;
    if p.eat_word_ci("IF") {
        p.expect_word_ci("NOT")?;
        p.expect_word_ci("EXISTS")?;
    }
    let name = p.read_name()?;
    p.expect_word_ci("ON")?;
    let table_name = p.read_name()?;
    p.expect_punct(b'(')?;

    let mut columns = Vec::new();
    loop {
        if p.eat_punct(b')') {
            break;
        }
        let col_name = p
            .bump()
            .and_then(Token::name_text)
            .ok_or_else(|| error::unsupported("expected a column name in CREATE INDEX"))?
            .to_string();
        columns.push(col_name);
        p.eat_word_ci("ASC");
        p.eat_word_ci("DESC");
        // A key expression with COLLATE or a functional index
        // argument list is rare; ride out any trailing tokens to the
        // next comma/close paren rather than failing the whole parse.
        if !matches!(p.peek(), Some(Token::Punct(b',')) | Some(Token::Punct(b')'))) {
            p.skip_to_item_boundary();
        }
        if p.eat_punct(b',') {
            continue;
        }
        p.expect_punct(b')')?;
        break;
    }

    let _ = expected_name;
    Ok(Some(Index {
        name,
        root_page,
        table_name,
        columns,
    }))
}

fn parse_create_view(expected_name: &str, sql: &str) -> Result<View, Error> {
    let mut p = Parser::new(sql);
    p.expect_word_ci("CREATE")?;
    p.eat_word_ci("TEMP");
    p.eat_word_ci("TEMPORARY");
    p.expect_word_ci("VIEW")?;
    if p.eat_word_ci("IF") {
        p.expect_word_ci("NOT")?;
        p.expect_word_ci("EXISTS")?;
    }
    let name = p.read_name()?;
    // Optional explicit column-name list: `VIEW v (a, b) AS ...`.
    if p.eat_punct(b'(') {
        let mut depth = 1i32;
        while depth > 0 {
            match p.bump() {
                None => break,
                Some(Token::Punct(b'(')) => depth += 1,
                Some(Token::Punct(b')')) => depth -= 1,
                _ => {}
            }
        }
    }
    p.expect_word_ci("AS")?;
    p.expect_word_ci("SELECT")?;

    let mut projection = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    loop {
        match p.peek() {
            None => break,
            Some(t) if depth == 0 && t.is_word_ci("FROM") => break,
            Some(Token::Punct(b'(')) => {
                depth += 1;
                current.push('(');
                p.pos += 1;
            }
            Some(Token::Punct(b)) if *b == b')' => {
                depth -= 1;
                current.push(')');
                p.pos += 1;
            }
            Some(Token::Punct(b',')) if depth == 0 => {
                projection.push(current.trim().to_string());
                current.clear();
                p.pos += 1;
            }
            Some(tok) => {
                if let Some(text) = tok.name_text() {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(text);
                } else if let Token::Punct(b) = tok {
                    current.push(*b as char);
                }
                p.pos += 1;
            }
        }
    }
    if !current.trim().is_empty() {
        projection.push(current.trim().to_string());
    }

    let is_select_all = projection.len() == 1 && projection[0] == "*";
    if is_select_all {
        projection.clear();
    }

    let mut referenced_tables = Vec::new();
    let mut has_join = false;
    let mut has_filter = false;

    if p.eat_word_ci("FROM") {
        if let Ok(t) = p.read_name() {
            referenced_tables.push(t);
        }
        p.eat_word_ci("AS");
        if matches!(p.peek(), Some(t) if t.name_text().is_some() && !is_reserved_after_table(t)) {
            p.pos += 1; // alias
        }
    }

    let mut depth = 0i32;
    loop {
        match p.peek() {
            None => break,
            Some(Token::Punct(b'(')) => {
                depth += 1;
                p.pos += 1;
            }
            Some(Token::Punct(b)) if *b == b')' => {
                depth -= 1;
                p.pos += 1;
            }
            Some(t) if depth == 0 && t.is_word_ci("JOIN") => {
                has_join = true;
                p.pos += 1;
                if let Ok(t) = p.read_name() {
                    referenced_tables.push(t);
                }
            }
            Some(t) if depth == 0 && (t.is_word_ci("INNER") || t.is_word_ci("LEFT") || t.is_word_ci("OUTER") || t.is_word_ci("CROSS")) => {
                has_join = true;
                p.pos += 1;
            }
            Some(t) if depth == 0 && t.is_word_ci("WHERE") => {
                has_filter = true;
                p.pos += 1;
            }
            _ => {
                p.pos += 1;
            }
        }
    }

    Ok(View {
        name,
        sql: sql.to_string(),
        referenced_tables,
        projection,
        has_join,
        has_filter,
        is_select_all,
    })
}

fn is_reserved_after_table(tok: &Token<'_>) -> bool {
    ["WHERE", "JOIN", "INNER", "LEFT", "OUTER", "CROSS", "GROUP", "ORDER", "LIMIT"]
        .iter()
        .any(|k| tok.is_word_ci(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_table() {
        let table = parse_create_table(
            "people",
            7,
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER DEFAULT 0)",
        )
        .unwrap();
        assert_eq!(table.name, "people");
        assert_eq!(table.columns.len(), 3);
        assert!(table.columns[0].is_rowid_alias);
        assert!(table.columns[0].primary_key);
        assert!(table.columns[1].not_null);
        assert!(table.columns[2].has_default);
        assert!(!table.without_rowid);
    }

    #[test]
    fn rejects_without_rowid_tables() {
        let err = parse_create_table("t", 2, "CREATE TABLE t (id INTEGER PRIMARY KEY) WITHOUT ROWID").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }

    #[test]
    fn skips_table_level_constraints() {
        let table = parse_create_table(
            "orders",
            3,
            "CREATE TABLE orders (order_id INTEGER, customer_id INTEGER, \
             PRIMARY KEY (order_id), FOREIGN KEY (customer_id) REFERENCES customers(id))",
        )
        .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert!(!table.columns[0].primary_key);
    }

    #[test]
    fn handles_quoted_identifiers_and_comments() {
        let table = parse_create_table(
            "t",
            1,
            "CREATE TABLE \"t\" (\n  -- a comment\n  \"id\" INTEGER PRIMARY KEY,\n  [value] TEXT /* inline */\n)",
        )
        .unwrap();
        assert_eq!(table.columns[0].name, "id");
        assert_eq!(table.columns[1].name, "value");
    }

    #[test]
    fn merges_guid_hi_lo_pair() {
        let table = parse_create_table(
            "widgets",
            1,
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, ExternalIdHi INTEGER, ExternalIdLo INTEGER)",
        )
        .unwrap();
        assert_eq!(table.merged_columns.len(), 1);
        assert_eq!(table.merged_columns[0].kind, MergedKind::Guid);
        assert_eq!(table.merged_columns[0].logical_name, "ExternalId");
    }

    #[test]
    fn merges_decimal_hi_lo_pair() {
        let table = parse_create_table(
            "invoices",
            1,
            "CREATE TABLE invoices (id INTEGER PRIMARY KEY, TotalDecimalHi INTEGER, TotalDecimalLo INTEGER)",
        )
        .unwrap();
        assert_eq!(table.merged_columns.len(), 1);
        assert_eq!(table.merged_columns[0].kind, MergedKind::Decimal);
        assert_eq!(table.merged_columns[0].logical_name, "Total");
    }

    #[test]
    fn parses_create_index() {
        let index = parse_create_index("idx_people_name", 9, "CREATE INDEX idx_people_name ON people (name ASC)")
            .unwrap()
            .unwrap();
        assert_eq!(index.table_name, "people");
        assert_eq!(index.columns, vec!["name".to_string()]);
    }

    #[test]
    fn parses_view_with_join_and_filter() {
        let view = parse_create_view(
            "v",
            "CREATE VIEW v AS SELECT a.id, b.label FROM a JOIN b ON a.id = b.a_id WHERE a.active = 1",
        )
        .unwrap();
        assert!(view.has_join);
        assert!(view.has_filter);
        assert!(!view.is_select_all);
        assert_eq!(view.referenced_tables, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn select_all_view_is_promotable() {
        let view = parse_create_view("v", "CREATE VIEW v AS SELECT * FROM people").unwrap();
        assert!(view.is_select_all);
        let promotion = view.promote().unwrap();
        assert_eq!(promotion.source_table, "people");
        assert!(promotion.projection.is_empty());
    }

    #[test]
    fn joined_view_is_not_promotable() {
        let view = parse_create_view(
            "v",
            "CREATE VIEW v AS SELECT a.id FROM a JOIN b ON a.id = b.a_id",
        )
        .unwrap();
        assert!(view.promote().is_none());
    }
}
