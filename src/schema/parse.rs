//! Hand-written CREATE TABLE parser.
//!
//! A small lexer feeds a recursive-descent parser. The grammar covers the
//! subset of MySQL DDL the copy engine needs: column definitions with
//! attributes, index definitions, CHECK constraints, table options and
//! partitioning clauses. Version-gated comments (`/*!50100 ... */`) are
//! parsed as if unwrapped. Backticked identifiers may contain arbitrary
//! UTF-8, including backticks escaped by doubling.

use crate::error::OscError;
use crate::schema::{
    Column, GeneratedKind, IndexColumn, IndexKind, Partition, PartitionDef, PartitionKind, SqlType,
    Table, TableIndex, TableOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Bare word (keyword or unquoted identifier)
    Word,
    /// Backtick-quoted identifier
    QuotedIdent,
    /// Single- or double-quoted string literal
    Str,
    Number,
    Punct,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// Decoded text: quotes stripped, doubled quote characters collapsed
    text: String,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        match c {
            Some('\n') => {
                self.line += 1;
                self.column = 1;
            }
            Some(_) => self.column += 1,
            None => {}
        }
        c
    }

    fn error(&self, message: impl Into<String>) -> OscError {
        OscError::Parse {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, OscError> {
        let mut tokens = Vec::new();
        // Depth of version-gated comments whose content is tokenized inline
        let mut gate_depth = 0usize;
        loop {
            let (line, column) = (self.line, self.column);
            let Some(&c) = self.chars.peek() else { break };
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_line(),
                '-' => {
                    self.bump();
                    if self.chars.peek() == Some(&'-') {
                        self.skip_line();
                    } else {
                        tokens.push(self.punct("-", line, column));
                    }
                }
                '/' => {
                    self.bump();
                    if self.chars.peek() == Some(&'*') {
                        self.bump();
                        if self.chars.peek() == Some(&'!') {
                            // /*!50100 ...: strip marker and version digits,
                            // then lex the body as normal input
                            self.bump();
                            while matches!(self.chars.peek(), Some(d) if d.is_ascii_digit()) {
                                self.bump();
                            }
                            gate_depth += 1;
                        } else {
                            self.skip_block_comment()?;
                        }
                    } else {
                        tokens.push(self.punct("/", line, column));
                    }
                }
                '*' => {
                    self.bump();
                    if self.chars.peek() == Some(&'/') && gate_depth > 0 {
                        self.bump();
                        gate_depth -= 1;
                    } else {
                        tokens.push(self.punct("*", line, column));
                    }
                }
                '`' => {
                    let text = self.read_quoted('`')?;
                    tokens.push(Token {
                        kind: TokenKind::QuotedIdent,
                        text,
                        line,
                        column,
                    });
                }
                '\'' | '"' => {
                    let text = self.read_quoted(c)?;
                    tokens.push(Token {
                        kind: TokenKind::Str,
                        text,
                        line,
                        column,
                    });
                }
                c if c.is_ascii_digit() => {
                    let mut text = String::new();
                    while matches!(self.chars.peek(), Some(d) if d.is_ascii_digit() || *d == '.') {
                        text.push(self.bump().unwrap());
                    }
                    tokens.push(Token {
                        kind: TokenKind::Number,
                        text,
                        line,
                        column,
                    });
                }
                c if c.is_alphabetic() || c == '_' || c == '@' || c == '$' => {
                    let mut text = String::new();
                    while matches!(
                        self.chars.peek(),
                        Some(d) if d.is_alphanumeric() || matches!(*d, '_' | '@' | '$')
                    ) {
                        text.push(self.bump().unwrap());
                    }
                    tokens.push(Token {
                        kind: TokenKind::Word,
                        text,
                        line,
                        column,
                    });
                }
                _ => {
                    let c = self.bump().unwrap();
                    tokens.push(self.punct(&c.to_string(), line, column));
                }
            }
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }

    fn punct(&self, text: &str, line: usize, column: usize) -> Token {
        Token {
            kind: TokenKind::Punct,
            text: text.to_string(),
            line,
            column,
        }
    }

    fn skip_line(&mut self) {
        while let Some(&c) = self.chars.peek() {
            self.bump();
            if c == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), OscError> {
        loop {
            match self.bump() {
                Some('*') if self.chars.peek() == Some(&'/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error("unterminated comment")),
            }
        }
    }

    /// Read a quoted token; the quote character is escaped by doubling,
    /// and backslash escapes apply inside string literals.
    fn read_quoted(&mut self, delim: char) -> Result<String, OscError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == delim => {
                    if self.chars.peek() == Some(&delim) {
                        self.bump();
                        text.push(delim);
                    } else {
                        return Ok(text);
                    }
                }
                Some('\\') if delim != '`' => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('0') => text.push('\0'),
                    Some(c) => text.push(c),
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) => text.push(c),
                None => return Err(self.error(format!("unterminated {delim}-quoted token"))),
            }
        }
    }
}

/// Behavior when the input contains statements other than CREATE TABLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtherStatements {
    Skip,
    Reject,
}

/// Parse the first CREATE TABLE statement out of `input`.
pub fn parse_create(input: &str, other: OtherStatements) -> Result<Table, OscError> {
    parse_creates(input, other)?
        .into_iter()
        .next()
        .ok_or(OscError::Parse {
            line: 1,
            column: 1,
            message: "no CREATE TABLE statement found".to_string(),
        })
}

/// Parse every CREATE TABLE statement in `input` (one per target table).
pub fn parse_creates(input: &str, other: OtherStatements) -> Result<Vec<Table>, OscError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut tables = Vec::new();
    while !parser.at_eof() {
        if parser.peek_word("CREATE") && parser.peek_word_at(1, "TABLE") {
            tables.push(parser.create_table()?);
            continue;
        }
        match other {
            OtherStatements::Skip => parser.skip_statement(),
            OtherStatements::Reject => {
                return Err(parser.err_here("input contains a statement other than CREATE TABLE"))
            }
        }
    }
    if tables.is_empty() {
        return Err(parser.err_here("no CREATE TABLE statement found"));
    }
    Ok(tables)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn err_here(&self, message: impl Into<String>) -> OscError {
        let t = self.peek();
        OscError::Parse {
            line: t.line,
            column: t.column,
            message: message.into(),
        }
    }

    fn peek_word(&self, word: &str) -> bool {
        self.peek_word_at(0, word)
    }

    fn peek_word_at(&self, offset: usize, word: &str) -> bool {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind == TokenKind::Word && t.text.eq_ignore_ascii_case(word))
            .unwrap_or(false)
    }

    /// Consume `word` if it is next; return whether it was.
    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_word(word) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), OscError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected {word}, found '{}'", self.peek().text)))
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().kind == TokenKind::Punct && self.peek().text == p {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), OscError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected '{p}', found '{}'", self.peek().text)))
        }
    }

    fn identifier(&mut self) -> Result<String, OscError> {
        let t = self.peek().clone();
        match t.kind {
            TokenKind::Word | TokenKind::QuotedIdent => {
                self.bump();
                Ok(t.text)
            }
            _ => Err(self.err_here(format!("expected identifier, found '{}'", t.text))),
        }
    }

    fn number(&mut self) -> Result<u64, OscError> {
        let t = self.peek().clone();
        if t.kind != TokenKind::Number {
            return Err(self.err_here(format!("expected number, found '{}'", t.text)));
        }
        self.bump();
        t.text
            .parse::<u64>()
            .map_err(|_| self.err_here(format!("invalid number '{}'", t.text)))
    }

    fn skip_statement(&mut self) {
        while !self.at_eof() {
            let t = self.bump();
            if t.kind == TokenKind::Punct && t.text == ";" {
                return;
            }
        }
    }

    /// Raw text of a balanced parenthesized group, parens excluded.
    fn paren_group_text(&mut self) -> Result<String, OscError> {
        self.expect_punct("(")?;
        let mut depth = 1usize;
        let mut parts: Vec<String> = Vec::new();
        loop {
            if self.at_eof() {
                return Err(self.err_here("unterminated parenthesized expression"));
            }
            let t = self.bump();
            match (t.kind, t.text.as_str()) {
                (TokenKind::Punct, "(") => {
                    depth += 1;
                    parts.push("(".into());
                }
                (TokenKind::Punct, ")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(parts.join(""));
                    }
                    parts.push(")".into());
                }
                (TokenKind::Punct, ",") => parts.push(", ".into()),
                (TokenKind::QuotedIdent, _) => parts.push(crate::sqlgen::quote(&t.text)),
                (TokenKind::Str, _) => parts.push(format!("'{}'", t.text.replace('\'', "''"))),
                _ => {
                    if !parts.is_empty()
                        && !matches!(parts.last().map(String::as_str), Some("(") | Some(", "))
                    {
                        parts.push(" ".into());
                    }
                    parts.push(t.text);
                }
            }
        }
    }

    fn create_table(&mut self) -> Result<Table, OscError> {
        self.expect_word("CREATE")?;
        self.expect_word("TABLE")?;
        if self.eat_word("IF") {
            self.expect_word("NOT")?;
            self.expect_word("EXISTS")?;
        }
        let mut name = self.identifier()?;
        // db.table form: keep the table part
        if self.eat_punct(".") {
            name = self.identifier()?;
        }
        self.expect_punct("(")?;

        let mut table = Table {
            name,
            columns: Vec::new(),
            indexes: Vec::new(),
            checks: Vec::new(),
            partition: None,
            options: TableOptions::default(),
        };
        loop {
            self.table_element(&mut table)?;
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(")")?;
            break;
        }
        self.table_options(&mut table)?;
        if self.peek_word("PARTITION") {
            table.partition = Some(self.partition_clause()?);
        }
        // Trailing semicolon and anything after it are not ours
        self.eat_punct(";");
        Ok(table)
    }

    fn table_element(&mut self, table: &mut Table) -> Result<(), OscError> {
        if self.peek_word("PRIMARY") {
            self.bump();
            self.expect_word("KEY")?;
            let columns = self.index_columns()?;
            table.indexes.push(TableIndex {
                name: "PRIMARY".to_string(),
                kind: IndexKind::Primary,
                columns,
            });
            return Ok(());
        }
        if self.peek_word("UNIQUE") {
            self.bump();
            let _ = self.eat_word("KEY") || self.eat_word("INDEX");
            return self.named_index(table, IndexKind::Unique);
        }
        if self.peek_word("FULLTEXT") || self.peek_word("SPATIAL") {
            let kind = if self.peek_word("FULLTEXT") {
                IndexKind::Fulltext
            } else {
                IndexKind::Spatial
            };
            self.bump();
            let _ = self.eat_word("KEY") || self.eat_word("INDEX");
            return self.named_index(table, kind);
        }
        if self.peek_word("KEY") || self.peek_word("INDEX") {
            self.bump();
            return self.named_index(table, IndexKind::NonUnique);
        }
        if self.peek_word("CONSTRAINT") {
            self.bump();
            // optional constraint symbol
            if !self.peek_word("CHECK")
                && !self.peek_word("UNIQUE")
                && !self.peek_word("PRIMARY")
                && !self.peek_word("FOREIGN")
            {
                self.identifier()?;
            }
            if self.peek_word("FOREIGN") {
                return Err(self.err_here("foreign key constraints are not supported"));
            }
            return self.table_element(table);
        }
        if self.peek_word("CHECK") {
            self.bump();
            let expr = self.paren_group_text()?;
            table.checks.push(expr);
            return Ok(());
        }
        let column = self.column_def(table)?;
        table.columns.push(column);
        Ok(())
    }

    fn named_index(&mut self, table: &mut Table, kind: IndexKind) -> Result<(), OscError> {
        let name = if self.peek().kind != TokenKind::Punct {
            self.identifier()?
        } else {
            // Unnamed index: MySQL derives the name from the first column;
            // we do the same after parsing the column list
            String::new()
        };
        let columns = self.index_columns()?;
        let name = if name.is_empty() {
            columns[0].name.clone()
        } else {
            name
        };
        table.indexes.push(TableIndex {
            name,
            kind,
            columns,
        });
        Ok(())
    }

    fn index_columns(&mut self) -> Result<Vec<IndexColumn>, OscError> {
        // optional USING BTREE|HASH before the column list
        if self.eat_word("USING") {
            self.identifier()?;
        }
        self.expect_punct("(")?;
        let mut columns = Vec::new();
        loop {
            let name = self.identifier()?;
            let prefix = if self.eat_punct("(") {
                let n = self.number()?;
                self.expect_punct(")")?;
                Some(n)
            } else {
                None
            };
            let descending = if self.eat_word("DESC") {
                true
            } else {
                self.eat_word("ASC");
                false
            };
            columns.push(IndexColumn {
                name,
                prefix,
                descending,
            });
            if self.eat_punct(",") {
                continue;
            }
            break;
        }
        self.expect_punct(")")?;
        // trailing index options
        loop {
            if self.eat_word("USING") {
                self.identifier()?;
            } else if self.eat_word("KEY_BLOCK_SIZE") {
                self.eat_punct("=");
                self.number()?;
            } else if self.eat_word("COMMENT") {
                self.bump();
            } else {
                break;
            }
        }
        Ok(columns)
    }

    fn column_def(&mut self, table: &mut Table) -> Result<Column, OscError> {
        let name = self.identifier()?;
        let sql_type = self.column_type()?;
        let mut column = Column {
            name,
            sql_type,
            nullable: true,
            default: None,
            charset: None,
            collation: None,
            auto_increment: false,
            on_update_current_timestamp: false,
            generated: None,
            comment: None,
        };
        loop {
            if self.eat_word("NOT") {
                self.expect_word("NULL")?;
                column.nullable = false;
            } else if self.eat_word("NULL") {
                column.nullable = true;
            } else if self.eat_word("DEFAULT") {
                column.default = Some(self.default_value()?);
            } else if self.eat_word("AUTO_INCREMENT") {
                column.auto_increment = true;
            } else if self.eat_word("CHARACTER") {
                self.expect_word("SET")?;
                column.charset = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("CHARSET") {
                column.charset = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("COLLATE") {
                column.collation = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("COMMENT") {
                let t = self.bump();
                column.comment = Some(t.text);
            } else if self.eat_word("ON") {
                self.expect_word("UPDATE")?;
                self.expect_word("CURRENT_TIMESTAMP")?;
                if self.peek().kind == TokenKind::Punct && self.peek().text == "(" {
                    self.paren_group_text()?;
                }
                column.on_update_current_timestamp = true;
            } else if self.peek_word("GENERATED") || self.peek_word("AS") {
                if self.eat_word("GENERATED") {
                    self.expect_word("ALWAYS")?;
                }
                self.expect_word("AS")?;
                let expr = self.paren_group_text()?;
                let kind = if self.eat_word("STORED") {
                    GeneratedKind::Stored
                } else {
                    self.eat_word("VIRTUAL");
                    GeneratedKind::Virtual
                };
                column.generated = Some((expr, kind));
            } else if self.eat_word("PRIMARY") {
                self.expect_word("KEY")?;
                table.indexes.push(TableIndex {
                    name: "PRIMARY".to_string(),
                    kind: IndexKind::Primary,
                    columns: vec![IndexColumn {
                        name: column.name.clone(),
                        prefix: None,
                        descending: false,
                    }],
                });
            } else if self.eat_word("UNIQUE") {
                let _ = self.eat_word("KEY");
                table.indexes.push(TableIndex {
                    name: column.name.clone(),
                    kind: IndexKind::Unique,
                    columns: vec![IndexColumn {
                        name: column.name.clone(),
                        prefix: None,
                        descending: false,
                    }],
                });
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn column_type(&mut self) -> Result<SqlType, OscError> {
        let base = self.identifier()?.to_lowercase();
        let mut sql_type = SqlType {
            base,
            length: None,
            decimals: None,
            unsigned: false,
            values: Vec::new(),
        };
        if self.peek().kind == TokenKind::Punct && self.peek().text == "(" {
            if sql_type.base == "enum" || sql_type.base == "set" {
                self.expect_punct("(")?;
                loop {
                    let t = self.bump();
                    if t.kind != TokenKind::Str {
                        return Err(self.err_here("expected string in ENUM/SET value list"));
                    }
                    sql_type.values.push(t.text);
                    if self.eat_punct(",") {
                        continue;
                    }
                    break;
                }
                self.expect_punct(")")?;
            } else {
                self.expect_punct("(")?;
                sql_type.length = Some(self.number()?);
                if self.eat_punct(",") {
                    sql_type.decimals = Some(self.number()?);
                }
                self.expect_punct(")")?;
            }
        }
        if self.eat_word("UNSIGNED") {
            sql_type.unsigned = true;
        }
        self.eat_word("ZEROFILL");
        Ok(sql_type)
    }

    fn default_value(&mut self) -> Result<String, OscError> {
        let t = self.peek().clone();
        match t.kind {
            TokenKind::Str => {
                self.bump();
                Ok(format!("'{}'", t.text.replace('\'', "''")))
            }
            TokenKind::Number => {
                self.bump();
                Ok(t.text)
            }
            TokenKind::Punct if t.text == "-" => {
                self.bump();
                let n = self.bump();
                Ok(format!("-{}", n.text))
            }
            TokenKind::Word if t.text.eq_ignore_ascii_case("NULL") => {
                self.bump();
                Ok("NULL".to_string())
            }
            TokenKind::Word
                if t.text.eq_ignore_ascii_case("CURRENT_TIMESTAMP")
                    || t.text.eq_ignore_ascii_case("NOW") =>
            {
                self.bump();
                if self.peek().kind == TokenKind::Punct && self.peek().text == "(" {
                    self.paren_group_text()?;
                }
                Ok("CURRENT_TIMESTAMP".to_string())
            }
            TokenKind::Word if t.text.eq_ignore_ascii_case("b") => {
                // bit literal b'0'
                self.bump();
                let lit = self.bump();
                Ok(format!("b'{}'", lit.text))
            }
            TokenKind::Punct if t.text == "(" => {
                let expr = self.paren_group_text()?;
                Ok(format!("({expr})"))
            }
            TokenKind::Word => {
                self.bump();
                Ok(t.text.to_uppercase())
            }
            _ => Err(self.err_here(format!("unexpected default value '{}'", t.text))),
        }
    }

    fn table_options(&mut self, table: &mut Table) -> Result<(), OscError> {
        loop {
            if self.eat_word("ENGINE") {
                self.eat_punct("=");
                table.options.engine = Some(self.identifier()?);
            } else if self.eat_word("AUTO_INCREMENT") {
                self.eat_punct("=");
                table.options.auto_increment = Some(self.number()?);
            } else if self.eat_word("DEFAULT") {
                // DEFAULT CHARSET / DEFAULT CHARACTER SET / DEFAULT COLLATE
                continue;
            } else if self.eat_word("CHARSET") {
                self.eat_punct("=");
                table.options.charset = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("CHARACTER") {
                self.expect_word("SET")?;
                self.eat_punct("=");
                table.options.charset = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("COLLATE") {
                self.eat_punct("=");
                table.options.collation = Some(self.identifier()?.to_lowercase());
            } else if self.eat_word("ROW_FORMAT") {
                self.eat_punct("=");
                table.options.row_format = Some(self.identifier()?.to_uppercase());
            } else if self.eat_word("COMMENT") {
                self.eat_punct("=");
                let t = self.bump();
                table.options.comment = Some(t.text);
            } else if self.peek().kind == TokenKind::Word && !self.peek_word("PARTITION") {
                // Unrecognized option (KEY_BLOCK_SIZE=8, STATS_PERSISTENT=0, ...)
                self.bump();
                self.eat_punct("=");
                if self.peek().kind != TokenKind::Punct {
                    self.bump();
                }
            } else {
                return Ok(());
            }
        }
    }

    fn partition_clause(&mut self) -> Result<Partition, OscError> {
        self.expect_word("PARTITION")?;
        self.expect_word("BY")?;
        self.eat_word("LINEAR");
        let kind = if self.eat_word("RANGE") {
            PartitionKind::Range
        } else if self.eat_word("LIST") {
            PartitionKind::List
        } else if self.eat_word("HASH") {
            PartitionKind::Hash
        } else if self.eat_word("KEY") {
            PartitionKind::Key
        } else {
            return Err(self.err_here("expected RANGE, LIST, HASH or KEY"));
        };
        // RANGE COLUMNS(...) / LIST COLUMNS(...)
        let columns_form = self.eat_word("COLUMNS");
        let expr = self.paren_group_text()?;
        let count = if self.eat_word("PARTITIONS") {
            Some(self.number()?)
        } else {
            None
        };
        let mut parts = Vec::new();
        if self.eat_punct("(") {
            loop {
                self.expect_word("PARTITION")?;
                let name = self.identifier()?;
                let values = if self.eat_word("VALUES") {
                    if self.eat_word("LESS") {
                        self.expect_word("THAN")?;
                        if self.eat_word("MAXVALUE") {
                            Some("LESS THAN MAXVALUE".to_string())
                        } else {
                            Some(format!("LESS THAN ({})", self.paren_group_text()?))
                        }
                    } else {
                        self.expect_word("IN")?;
                        Some(format!("IN ({})", self.paren_group_text()?))
                    }
                } else {
                    None
                };
                let engine = if self.eat_word("ENGINE") {
                    self.eat_punct("=");
                    Some(self.identifier()?)
                } else {
                    None
                };
                parts.push(PartitionDef {
                    name,
                    values,
                    engine,
                });
                if self.eat_punct(",") {
                    continue;
                }
                break;
            }
            self.expect_punct(")")?;
        }
        Ok(Partition {
            kind,
            columns_form,
            expr,
            count,
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Table {
        parse_create(sql, OtherStatements::Reject).expect("parse failed")
    }

    #[test]
    fn parses_simple_table() {
        let t = parse(
            "CREATE TABLE `table1` (
               `id` int(11) NOT NULL,
               `data` varchar(10) DEFAULT NULL,
               PRIMARY KEY (`id`)
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        );
        assert_eq!(t.name, "table1");
        assert_eq!(t.column_names(), vec!["id", "data"]);
        assert!(!t.columns[0].nullable);
        assert!(t.columns[1].nullable);
        assert_eq!(t.columns[1].default.as_deref(), Some("NULL"));
        assert_eq!(t.pk_column_names(), vec!["id"]);
        assert_eq!(t.options.engine.as_deref(), Some("InnoDB"));
        assert_eq!(t.options.charset.as_deref(), Some("utf8mb4"));
    }

    #[test]
    fn parses_composite_pk_and_inline_keys() {
        let t = parse(
            "CREATE TABLE t (
               id1 int, id2 int, id3 int,
               v varchar(64) UNIQUE,
               PRIMARY KEY (id1, id2, id3),
               KEY ix_v (v(10) DESC)
             )",
        );
        assert_eq!(t.pk_column_names(), vec!["id1", "id2", "id3"]);
        let ix = t.indexes.iter().find(|i| i.name == "ix_v").unwrap();
        assert_eq!(ix.columns[0].prefix, Some(10));
        assert!(ix.columns[0].descending);
        assert!(t
            .indexes
            .iter()
            .any(|i| i.kind == IndexKind::Unique && i.name == "v"));
    }

    #[test]
    fn parses_version_gated_partition_clause() {
        let t = parse(
            "CREATE TABLE t (id int PRIMARY KEY)
             /*!50100 PARTITION BY HASH(id) PARTITIONS 2 */",
        );
        let p = t.partition.expect("partition parsed");
        assert_eq!(p.kind, PartitionKind::Hash);
        assert_eq!(p.count, Some(2));
        assert_eq!(p.expr, "id");
    }

    #[test]
    fn parses_range_partitions_with_engines() {
        let t = parse(
            "CREATE TABLE t (id int PRIMARY KEY)
             PARTITION BY RANGE (id)
             (PARTITION p0 VALUES LESS THAN (100) ENGINE = InnoDB,
              PARTITION p1 VALUES LESS THAN MAXVALUE ENGINE = InnoDB)",
        );
        let p = t.partition.unwrap();
        assert_eq!(p.kind, PartitionKind::Range);
        assert_eq!(p.parts.len(), 2);
        assert_eq!(p.parts[0].values.as_deref(), Some("LESS THAN (100)"));
        assert_eq!(p.parts[1].values.as_deref(), Some("LESS THAN MAXVALUE"));
        assert_eq!(p.parts[0].engine.as_deref(), Some("InnoDB"));
    }

    #[test]
    fn parses_unicode_table_name() {
        let t = parse("CREATE TABLE `(╯°□°）╯︵ ┻━┻` (id int PRIMARY KEY)");
        assert_eq!(t.name, "(╯°□°）╯︵ ┻━┻");
    }

    #[test]
    fn doubled_backtick_identifier() {
        let t = parse("CREATE TABLE `a``b` (id int PRIMARY KEY)");
        assert_eq!(t.name, "a`b");
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse_create("CREATE TABLE t (\nid int,\n)", OtherStatements::Reject)
            .expect_err("should fail");
        match err {
            OscError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_extra_statements_when_configured() {
        let input = "DROP TABLE t; CREATE TABLE t (id int PRIMARY KEY)";
        assert!(parse_create(input, OtherStatements::Reject).is_err());
        let t = parse_create(input, OtherStatements::Skip).expect("skipped leading statement");
        assert_eq!(t.name, "t");
    }

    #[test]
    fn parses_generated_column_and_check() {
        let t = parse(
            "CREATE TABLE t (
               id int PRIMARY KEY,
               doubled int GENERATED ALWAYS AS (id * 2) STORED,
               CHECK (id > 0)
             )",
        );
        let gen = t.column("doubled").unwrap().generated.as_ref().unwrap();
        assert_eq!(gen.1, GeneratedKind::Stored);
        assert_eq!(t.checks.len(), 1);
    }

    #[test]
    fn parses_enum_timestamp_and_collate() {
        let t = parse(
            "CREATE TABLE t (
               id int unsigned NOT NULL AUTO_INCREMENT,
               state enum('new','done') NOT NULL DEFAULT 'new',
               mtime timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
               name varchar(32) COLLATE latin1_general_cs DEFAULT NULL,
               PRIMARY KEY (id)
             ) ENGINE=InnoDB AUTO_INCREMENT=42 DEFAULT CHARSET=latin1",
        );
        assert!(t.columns[0].sql_type.unsigned);
        assert!(t.columns[0].auto_increment);
        assert_eq!(t.columns[1].sql_type.values, vec!["new", "done"]);
        assert!(t.columns[2].on_update_current_timestamp);
        assert_eq!(
            t.column("name").unwrap().collation.as_deref(),
            Some("latin1_general_cs")
        );
        assert_eq!(t.options.auto_increment, Some(42));
    }

    #[test]
    fn unparse_then_reparse_is_stable() {
        let t = parse(
            "CREATE TABLE `t` (
               `id` int NOT NULL,
               `name` varchar(64) CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci DEFAULT 'x',
               PRIMARY KEY (`id`),
               UNIQUE KEY `ux_name` (`name`)
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
             PARTITION BY HASH(`id`) PARTITIONS 4",
        );
        let rendered = t.to_sql();
        let reparsed = parse(&rendered);
        assert!(t.semantically_equal(&reparsed));
        assert_eq!(rendered, reparsed.to_sql());
    }
}
