//! Normalized in-memory model of a MySQL table definition.
//!
//! A [`Table`] is produced by [`parse::parse_create`] and consumed by the
//! differ and the SQL builders. Two tables are semantically equal iff their
//! canonical forms render to the same SQL: indexes sorted by name, integer
//! display widths dropped, charset/collation resolved from table defaults,
//! per-partition engine clauses stripped.

pub mod diff;
pub mod parse;

use crate::sqlgen::quote;

/// A parsed SQL column type: base name plus optional length/precision,
/// and the value list for ENUM/SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlType {
    /// Lowercased base type name ("int", "varchar", "enum", ...)
    pub base: String,
    pub length: Option<u64>,
    pub decimals: Option<u64>,
    pub unsigned: bool,
    /// Allowed values for ENUM/SET types, in declaration order
    pub values: Vec<String>,
}

const INT_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "bigint"];

impl SqlType {
    pub fn is_integer(&self) -> bool {
        INT_TYPES.contains(&self.base.as_str())
    }

    /// Width rank inside the integer family, for narrowing detection.
    pub fn integer_rank(&self) -> Option<usize> {
        INT_TYPES.iter().position(|t| *t == self.base)
    }

    pub fn is_character(&self) -> bool {
        matches!(
            self.base.as_str(),
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext"
        )
    }

    /// Render the type with canonical spelling: integer display widths are
    /// dropped (`int(11)` == `int`), everything else keeps its length.
    pub fn canonical_sql(&self) -> String {
        let mut out = self.base.clone();
        if !self.values.is_empty() {
            let vals: Vec<String> = self
                .values
                .iter()
                .map(|v| format!("'{}'", v.replace('\'', "''")))
                .collect();
            out.push_str(&format!("({})", vals.join(",")));
        } else if !self.is_integer() {
            if let Some(len) = self.length {
                match self.decimals {
                    Some(d) => out.push_str(&format!("({},{})", len, d)),
                    None => out.push_str(&format!("({})", len)),
                }
            }
        }
        if self.unsigned {
            out.push_str(" unsigned");
        }
        out
    }
}

/// Generated-column storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKind {
    Virtual,
    Stored,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    /// Default value as written (literal text, or `CURRENT_TIMESTAMP`)
    pub default: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub auto_increment: bool,
    pub on_update_current_timestamp: bool,
    /// Expression text for generated columns
    pub generated: Option<(String, GeneratedKind)>,
    pub comment: Option<String>,
}

impl Column {
    pub fn to_sql(&self) -> String {
        let mut parts = vec![quote(&self.name), self.sql_type.canonical_sql()];
        if let Some(cs) = &self.charset {
            parts.push(format!("CHARACTER SET {cs}"));
        }
        if let Some(col) = &self.collation {
            parts.push(format!("COLLATE {col}"));
        }
        if let Some((expr, kind)) = &self.generated {
            parts.push(format!("GENERATED ALWAYS AS ({expr})"));
            parts.push(
                match kind {
                    GeneratedKind::Virtual => "VIRTUAL",
                    GeneratedKind::Stored => "STORED",
                }
                .to_string(),
            );
        }
        parts.push(if self.nullable { "NULL" } else { "NOT NULL" }.to_string());
        if let Some(default) = &self.default {
            parts.push(format!("DEFAULT {default}"));
        }
        if self.on_update_current_timestamp {
            parts.push("ON UPDATE CURRENT_TIMESTAMP".to_string());
        }
        if self.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }
        if let Some(comment) = &self.comment {
            parts.push(format!("COMMENT '{}'", comment.replace('\'', "''")));
        }
        parts.join(" ")
    }
}

/// Index classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Unique,
    NonUnique,
    Fulltext,
    Spatial,
}

/// One column reference inside an index, with optional prefix length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    pub prefix: Option<u64>,
    pub descending: bool,
}

impl IndexColumn {
    fn to_sql(&self) -> String {
        let mut out = quote(&self.name);
        if let Some(p) = self.prefix {
            out.push_str(&format!("({p})"));
        }
        if self.descending {
            out.push_str(" DESC");
        }
        out
    }
}

/// An index definition. The primary key is modeled as an index named
/// `PRIMARY` with kind [`IndexKind::Primary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIndex {
    pub name: String,
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
}

impl TableIndex {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn to_sql(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| c.to_sql()).collect();
        let cols = cols.join(", ");
        match self.kind {
            IndexKind::Primary => format!("PRIMARY KEY ({cols})"),
            IndexKind::Unique => format!("UNIQUE KEY {} ({cols})", quote(&self.name)),
            IndexKind::NonUnique => format!("KEY {} ({cols})", quote(&self.name)),
            IndexKind::Fulltext => format!("FULLTEXT KEY {} ({cols})", quote(&self.name)),
            IndexKind::Spatial => format!("SPATIAL KEY {} ({cols})", quote(&self.name)),
        }
    }
}

/// Partitioning scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Range,
    List,
    Hash,
    Key,
}

/// A single partition definition inside RANGE/LIST partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDef {
    pub name: String,
    /// `VALUES LESS THAN (..)` / `VALUES IN (..)` payload, verbatim
    pub values: Option<String>,
    /// Per-partition engine clause; stripped in canonical form
    pub engine: Option<String>,
}

/// Table partitioning descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub kind: PartitionKind,
    /// RANGE COLUMNS / LIST COLUMNS form
    pub columns_form: bool,
    /// Partitioning expression or column list, verbatim
    pub expr: String,
    /// `PARTITIONS n` count for HASH/KEY
    pub count: Option<u64>,
    pub parts: Vec<PartitionDef>,
}

impl Partition {
    pub fn to_sql(&self) -> String {
        let kind = match self.kind {
            PartitionKind::Range => "RANGE",
            PartitionKind::List => "LIST",
            PartitionKind::Hash => "HASH",
            PartitionKind::Key => "KEY",
        };
        let columns = if self.columns_form { " COLUMNS" } else { "" };
        let mut out = format!("PARTITION BY {kind}{columns} ({})", self.expr);
        if let Some(n) = self.count {
            out.push_str(&format!(" PARTITIONS {n}"));
        }
        if !self.parts.is_empty() {
            let defs: Vec<String> = self
                .parts
                .iter()
                .map(|p| {
                    let mut d = format!("PARTITION {}", quote(&p.name));
                    if let Some(v) = &p.values {
                        d.push_str(&format!(" VALUES {v}"));
                    }
                    if let Some(e) = &p.engine {
                        d.push_str(&format!(" ENGINE = {e}"));
                    }
                    d
                })
                .collect();
            out.push_str(&format!(" ({})", defs.join(", ")));
        }
        out
    }
}

/// Table-level options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub engine: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub row_format: Option<String>,
    pub comment: Option<String>,
    pub auto_increment: Option<u64>,
}

/// A normalized table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Vec<TableIndex>,
    /// CHECK constraint expressions, verbatim
    pub checks: Vec<String>,
    pub partition: Option<Partition>,
    pub options: TableOptions,
}

/// Default collation for the charsets we resolve; unknown charsets keep
/// an unresolved collation rather than guessing.
fn default_collation(charset: &str) -> Option<&'static str> {
    match charset {
        "latin1" => Some("latin1_swedish_ci"),
        "utf8" | "utf8mb3" => Some("utf8_general_ci"),
        "utf8mb4" => Some("utf8mb4_general_ci"),
        "ascii" => Some("ascii_general_ci"),
        "binary" => Some("binary"),
        _ => None,
    }
}

impl Table {
    pub fn primary_key(&self) -> Option<&TableIndex> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    /// PK column names, empty when there is no primary key.
    pub fn pk_column_names(&self) -> Vec<String> {
        self.primary_key()
            .map(|pk| pk.column_names())
            .unwrap_or_default()
    }

    pub fn has_unique_index(&self) -> bool {
        self.indexes
            .iter()
            .any(|i| matches!(i.kind, IndexKind::Primary | IndexKind::Unique))
    }

    /// The index the copy and replay machinery keys on: the primary key,
    /// or the first unique index when there is no primary key. The chunk
    /// dump forces this index by name, so the fallback's real name must
    /// travel with its columns.
    pub fn copy_key_index(&self) -> Option<&TableIndex> {
        self.primary_key()
            .or_else(|| self.indexes.iter().find(|i| i.kind == IndexKind::Unique))
    }

    /// Column names of [`Table::copy_key_index`], empty when there is none.
    pub fn copy_key_columns(&self) -> Vec<String> {
        self.copy_key_index()
            .map(|i| i.column_names())
            .unwrap_or_default()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Canonical form used for semantic equality: indexes sorted by name,
    /// charsets/collations resolved down from table level, partition engine
    /// clauses dropped.
    pub fn canonical(&self) -> Table {
        let mut t = self.clone();
        let table_charset = t.options.charset.clone();
        let table_collation = t
            .options
            .collation
            .clone()
            .or_else(|| {
                table_charset
                    .as_deref()
                    .and_then(default_collation)
                    .map(str::to_string)
            });
        t.options.collation = table_collation.clone();
        for col in &mut t.columns {
            if col.sql_type.is_character() {
                if col.charset.is_none() {
                    col.charset = table_charset.clone();
                }
                if col.collation.is_none() {
                    col.collation = col
                        .charset
                        .as_deref()
                        .and_then(default_collation)
                        .map(str::to_string)
                        .or_else(|| table_collation.clone());
                }
            }
        }
        t.indexes.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(p) = &mut t.partition {
            for def in &mut p.parts {
                def.engine = None;
            }
        }
        // The next-value counter moves with every insert; it is not part of
        // the schema
        t.options.auto_increment = None;
        t
    }

    /// Two tables are semantically equal iff their canonical forms render
    /// byte-identically.
    pub fn semantically_equal(&self, other: &Table) -> bool {
        self.canonical().to_sql() == other.canonical().to_sql()
    }

    /// Render back to a CREATE TABLE statement.
    pub fn to_sql(&self) -> String {
        let mut body: Vec<String> = self.columns.iter().map(|c| format!("  {}", c.to_sql())).collect();
        body.extend(self.indexes.iter().map(|i| format!("  {}", i.to_sql())));
        body.extend(self.checks.iter().map(|c| format!("  CHECK ({c})")));
        let mut out = format!("CREATE TABLE {} (\n{}\n)", quote(&self.name), body.join(",\n"));
        if let Some(engine) = &self.options.engine {
            out.push_str(&format!(" ENGINE={engine}"));
        }
        if let Some(n) = self.options.auto_increment {
            out.push_str(&format!(" AUTO_INCREMENT={n}"));
        }
        if let Some(cs) = &self.options.charset {
            out.push_str(&format!(" DEFAULT CHARSET={cs}"));
        }
        if let Some(col) = &self.options.collation {
            out.push_str(&format!(" COLLATE={col}"));
        }
        if let Some(rf) = &self.options.row_format {
            out.push_str(&format!(" ROW_FORMAT={rf}"));
        }
        if let Some(c) = &self.options.comment {
            out.push_str(&format!(" COMMENT='{}'", c.replace('\'', "''")));
        }
        if let Some(p) = &self.partition {
            out.push_str(&format!("\n{}", p.to_sql()));
        }
        out
    }

    /// Render a CREATE TABLE for the shadow table: same definition under a
    /// different name, optionally with the partition clause stripped.
    pub fn to_sql_named(&self, name: &str, strip_partition: bool) -> String {
        let mut t = self.clone();
        t.name = name.to_string();
        if strip_partition {
            t.partition = None;
        }
        t.to_sql()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_col(name: &str) -> Column {
        Column {
            name: name.to_string(),
            sql_type: SqlType {
                base: "int".into(),
                length: Some(11),
                decimals: None,
                unsigned: false,
                values: vec![],
            },
            nullable: false,
            default: None,
            charset: None,
            collation: None,
            auto_increment: false,
            on_update_current_timestamp: false,
            generated: None,
            comment: None,
        }
    }

    #[test]
    fn integer_display_width_is_not_significant() {
        let mut a = int_col("id");
        let mut b = int_col("id");
        a.sql_type.length = Some(11);
        b.sql_type.length = None;
        assert_eq!(a.sql_type.canonical_sql(), b.sql_type.canonical_sql());
    }

    #[test]
    fn canonical_resolves_collation_from_table_charset() {
        let mut col = int_col("name");
        col.sql_type = SqlType {
            base: "varchar".into(),
            length: Some(64),
            decimals: None,
            unsigned: false,
            values: vec![],
        };
        let table = Table {
            name: "t".into(),
            columns: vec![col],
            indexes: vec![],
            checks: vec![],
            partition: None,
            options: TableOptions {
                charset: Some("latin1".into()),
                ..Default::default()
            },
        };
        let canon = table.canonical();
        assert_eq!(canon.columns[0].charset.as_deref(), Some("latin1"));
        assert_eq!(
            canon.columns[0].collation.as_deref(),
            Some("latin1_swedish_ci")
        );
        assert_eq!(canon.options.collation.as_deref(), Some("latin1_swedish_ci"));
    }

    #[test]
    fn canonical_sorts_indexes_and_strips_partition_engines() {
        let table = Table {
            name: "t".into(),
            columns: vec![int_col("id")],
            indexes: vec![
                TableIndex {
                    name: "ix_b".into(),
                    kind: IndexKind::NonUnique,
                    columns: vec![IndexColumn {
                        name: "id".into(),
                        prefix: None,
                        descending: false,
                    }],
                },
                TableIndex {
                    name: "PRIMARY".into(),
                    kind: IndexKind::Primary,
                    columns: vec![IndexColumn {
                        name: "id".into(),
                        prefix: None,
                        descending: false,
                    }],
                },
            ],
            checks: vec![],
            partition: Some(Partition {
                kind: PartitionKind::Hash,
                columns_form: false,
                expr: "`id`".into(),
                count: Some(2),
                parts: vec![PartitionDef {
                    name: "p0".into(),
                    values: None,
                    engine: Some("InnoDB".into()),
                }],
            }),
            options: TableOptions::default(),
        };
        let canon = table.canonical();
        assert_eq!(canon.indexes[0].name, "PRIMARY");
        assert!(canon.partition.as_ref().unwrap().parts[0].engine.is_none());
    }
}
