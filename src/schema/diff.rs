//! Schema differ: classifies the change between two table definitions and
//! produces the ordered diff plus the safe-copy projection.

use crate::schema::{Column, IndexKind, Table};

/// Policy switches that gate which diffs are allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub allow_no_pk: bool,
    pub allow_new_pk: bool,
    pub eliminate_dups: bool,
    pub fail_for_implicit_conv: bool,
    pub no_engine_check: bool,
}

/// One entry of the ordered diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffChange {
    AddColumn(String),
    DropColumn(String),
    ModifyColumn(String),
    AddIndex(String),
    DropIndex(String),
    OptionChange(String),
    PartitionChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Old and new are semantically equal; nothing to do
    Identical,
    /// A row-by-row INSERT..SELECT projection is well-defined and lossless
    SafeCopy,
    /// At least one column needs a lossy or implicit conversion
    Unsafe,
    /// Disallowed by policy
    Rejected,
}

/// The differ's result: classification, ordered changes, rejection reasons
/// and the safe-copy projection (columns shared by both schemas, in source
/// order, excluding generated columns).
#[derive(Debug, Clone)]
pub struct SchemaDiff {
    pub classification: Classification,
    pub changes: Vec<DiffChange>,
    pub reasons: Vec<String>,
    pub projection: Vec<String>,
}

impl SchemaDiff {
    pub fn is_rejected(&self) -> bool {
        self.classification == Classification::Rejected
    }
}

/// Does a PK-or-unique-key column change its byte interpretation between
/// the two definitions? A collation or charset change on a key column can
/// collapse values that were distinct before.
fn key_collation_collision(old: &Table, new: &Table, name: &str) -> bool {
    let in_new_key = new.indexes.iter().any(|i| {
        matches!(i.kind, IndexKind::Primary | IndexKind::Unique)
            && i.columns.iter().any(|c| c.name == name)
    });
    if !in_new_key {
        return false;
    }
    let (Some(old_col), Some(new_col)) = (old.column(name), new.column(name)) else {
        return false;
    };
    if !old_col.sql_type.is_character() || !new_col.sql_type.is_character() {
        return false;
    }
    old_col.charset != new_col.charset || old_col.collation != new_col.collation
}

/// Lossy/implicit conversion detection for a shared column.
fn implicit_conversion(old_col: &Column, new_col: &Column) -> Option<String> {
    let old_t = &old_col.sql_type;
    let new_t = &new_col.sql_type;
    if old_t.is_integer() && new_t.is_integer() {
        if new_t.integer_rank() < old_t.integer_rank() {
            return Some(format!(
                "column `{}` narrows {} to {}",
                old_col.name, old_t.base, new_t.base
            ));
        }
        if old_t.unsigned && !new_t.unsigned {
            return Some(format!(
                "column `{}` drops unsigned and halves its range",
                old_col.name
            ));
        }
    }
    if old_t.is_character() && new_t.is_character() {
        if let (Some(old_len), Some(new_len)) = (old_t.length, new_t.length) {
            if new_len < old_len {
                return Some(format!(
                    "column `{}` shrinks from {}({}) to {}({})",
                    old_col.name, old_t.base, old_len, new_t.base, new_len
                ));
            }
        }
        if old_col.charset != new_col.charset {
            return Some(format!(
                "column `{}` changes charset {:?} -> {:?}",
                old_col.name, old_col.charset, new_col.charset
            ));
        }
    }
    None
}

/// Compute the diff between the current (`old`) and desired (`new`) schema.
///
/// The policy rules run in a fixed order; the first violated rule rejects
/// the diff with its reason, further rules still run so the caller sees all
/// reasons at once.
pub fn diff(old: &Table, new: &Table, opts: &DiffOptions) -> SchemaDiff {
    let old_canon = old.canonical();
    let new_canon = new.canonical();

    let projection: Vec<String> = old_canon
        .columns
        .iter()
        .filter(|c| {
            new_canon
                .column(&c.name)
                .map(|n| n.generated.is_none())
                .unwrap_or(false)
        })
        .map(|c| c.name.clone())
        .collect();

    if old_canon.to_sql() == new_canon.to_sql() {
        return SchemaDiff {
            classification: Classification::Identical,
            changes: Vec::new(),
            reasons: Vec::new(),
            projection,
        };
    }

    let mut changes = Vec::new();
    let mut reasons = Vec::new();
    let mut lossy = Vec::new();

    // Rule 1: the new schema must keep a primary or unique key
    if !new_canon.has_unique_index() && !opts.allow_no_pk {
        reasons.push("new schema has no primary or unique key".to_string());
    }

    // Rule 2: changing the primary key needs an explicit opt-in
    if old_canon.pk_column_names() != new_canon.pk_column_names() && !opts.allow_new_pk {
        reasons.push(format!(
            "primary key changes from ({}) to ({})",
            old_canon.pk_column_names().join(", "),
            new_canon.pk_column_names().join(", "),
        ));
    }

    for old_col in &old_canon.columns {
        match new_canon.column(&old_col.name) {
            None => changes.push(DiffChange::DropColumn(old_col.name.clone())),
            Some(new_col) => {
                if old_col != new_col {
                    changes.push(DiffChange::ModifyColumn(old_col.name.clone()));
                }
                // Rule 3: byte-reinterpreting change on a key column
                if key_collation_collision(&old_canon, &new_canon, &old_col.name)
                    && !opts.eliminate_dups
                {
                    reasons.push(format!(
                        "collation change on key column `{}` may collapse distinct values \
                         (CollationChangeCollision)",
                        old_col.name
                    ));
                }
                // Rule 4: lossy conversions
                if let Some(why) = implicit_conversion(old_col, new_col) {
                    lossy.push(why);
                }
            }
        }
    }
    for new_col in &new_canon.columns {
        if old_canon.column(&new_col.name).is_none() {
            changes.push(DiffChange::AddColumn(new_col.name.clone()));
        }
    }

    if opts.fail_for_implicit_conv {
        reasons.extend(lossy.iter().cloned());
    }

    // Rule 5: engine changes need an explicit opt-in
    if old_canon.options.engine != new_canon.options.engine && !opts.no_engine_check {
        reasons.push(format!(
            "engine changes from {:?} to {:?}",
            old_canon.options.engine, new_canon.options.engine
        ));
    }

    // Generated columns and CHECK constraints are never silently dropped or
    // rewritten; a difference in either refuses the change.
    for old_col in &old_canon.columns {
        if let Some(new_col) = new_canon.column(&old_col.name) {
            if old_col.generated != new_col.generated {
                reasons.push(format!(
                    "generated expression of column `{}` differs",
                    old_col.name
                ));
            }
        }
    }
    if old_canon.checks != new_canon.checks {
        reasons.push("CHECK constraints differ between schemas".to_string());
    }

    for old_ix in &old_canon.indexes {
        match new_canon.indexes.iter().find(|i| i.name == old_ix.name) {
            None => changes.push(DiffChange::DropIndex(old_ix.name.clone())),
            Some(new_ix) if new_ix != old_ix => {
                changes.push(DiffChange::DropIndex(old_ix.name.clone()));
                changes.push(DiffChange::AddIndex(old_ix.name.clone()));
            }
            Some(_) => {}
        }
    }
    for new_ix in &new_canon.indexes {
        if !old_canon.indexes.iter().any(|i| i.name == new_ix.name) {
            changes.push(DiffChange::AddIndex(new_ix.name.clone()));
        }
    }

    for (name, old_v, new_v) in [
        ("engine", &old_canon.options.engine, &new_canon.options.engine),
        ("charset", &old_canon.options.charset, &new_canon.options.charset),
        (
            "collation",
            &old_canon.options.collation,
            &new_canon.options.collation,
        ),
        (
            "row_format",
            &old_canon.options.row_format,
            &new_canon.options.row_format,
        ),
        ("comment", &old_canon.options.comment, &new_canon.options.comment),
    ] {
        if old_v != new_v {
            changes.push(DiffChange::OptionChange(name.to_string()));
        }
    }

    if old_canon.partition != new_canon.partition {
        changes.push(DiffChange::PartitionChange);
    }

    let classification = if !reasons.is_empty() {
        Classification::Rejected
    } else if !lossy.is_empty() {
        Classification::Unsafe
    } else {
        Classification::SafeCopy
    };

    SchemaDiff {
        classification,
        changes,
        reasons,
        projection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse::{parse_create, OtherStatements};

    fn table(sql: &str) -> Table {
        parse_create(sql, OtherStatements::Reject).unwrap()
    }

    #[test]
    fn diff_is_reflexive() {
        let t = table(
            "CREATE TABLE t (id int NOT NULL, data varchar(10), PRIMARY KEY (id)) \
             ENGINE=InnoDB DEFAULT CHARSET=latin1",
        );
        let d = diff(&t, &t, &DiffOptions::default());
        assert_eq!(d.classification, Classification::Identical);
        assert!(d.changes.is_empty());
    }

    #[test]
    fn cosmetic_int_width_is_identical() {
        let a = table("CREATE TABLE t (id int(11) NOT NULL, PRIMARY KEY (id))");
        let b = table("CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id))");
        let d = diff(&a, &b, &DiffOptions::default());
        assert_eq!(d.classification, Classification::Identical);
    }

    #[test]
    fn add_column_is_safe_copy() {
        let a = table("CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id))");
        let b = table(
            "CREATE TABLE t (id int NOT NULL, data varchar(10) DEFAULT NULL, PRIMARY KEY (id))",
        );
        let d = diff(&a, &b, &DiffOptions::default());
        assert_eq!(d.classification, Classification::SafeCopy);
        assert_eq!(d.changes, vec![DiffChange::AddColumn("data".into())]);
        assert_eq!(d.projection, vec!["id"]);
    }

    #[test]
    fn pk_removal_is_rejected_without_opt_in() {
        let a = table(
            "CREATE TABLE t (id1 int NOT NULL, id2 int NOT NULL, id3 int NOT NULL, \
             PRIMARY KEY (id1, id2, id3))",
        );
        let b = table(
            "CREATE TABLE t (id1 int NOT NULL, id2 int NOT NULL, id3 int NOT NULL, \
             PRIMARY KEY (id2, id3))",
        );
        let d = diff(&a, &b, &DiffOptions::default());
        assert!(d.is_rejected());
        assert!(d.reasons.iter().any(|r| r.contains("primary key")));

        let allowed = diff(
            &a,
            &b,
            &DiffOptions {
                allow_new_pk: true,
                ..Default::default()
            },
        );
        assert!(!allowed.is_rejected());
    }

    #[test]
    fn missing_pk_is_rejected_without_opt_in() {
        let a = table("CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id))");
        let b = table("CREATE TABLE t (id int NOT NULL)");
        let d = diff(&a, &b, &DiffOptions::default());
        assert!(d.is_rejected());
        let allowed = diff(
            &a,
            &b,
            &DiffOptions {
                allow_no_pk: true,
                allow_new_pk: true,
                ..Default::default()
            },
        );
        assert!(!allowed.is_rejected());
    }

    #[test]
    fn collation_change_on_pk_collides_without_eliminate_dups() {
        let a = table(
            "CREATE TABLE t (data varchar(10) NOT NULL, PRIMARY KEY (data)) \
             DEFAULT CHARSET=latin1",
        );
        let b = table(
            "CREATE TABLE t (data varchar(10) COLLATE latin1_general_cs NOT NULL, \
             PRIMARY KEY (data)) DEFAULT CHARSET=latin1",
        );
        let d = diff(&a, &b, &DiffOptions::default());
        assert!(d.is_rejected());
        assert!(d
            .reasons
            .iter()
            .any(|r| r.contains("CollationChangeCollision")));

        let allowed = diff(
            &a,
            &b,
            &DiffOptions {
                eliminate_dups: true,
                ..Default::default()
            },
        );
        assert!(!allowed.is_rejected());
    }

    #[test]
    fn narrowing_is_unsafe_and_rejected_with_strict_conv() {
        let a = table("CREATE TABLE t (id int NOT NULL, n bigint, PRIMARY KEY (id))");
        let b = table("CREATE TABLE t (id int NOT NULL, n int, PRIMARY KEY (id))");
        let d = diff(&a, &b, &DiffOptions::default());
        assert_eq!(d.classification, Classification::Unsafe);

        let strict = diff(
            &a,
            &b,
            &DiffOptions {
                fail_for_implicit_conv: true,
                ..Default::default()
            },
        );
        assert!(strict.is_rejected());
    }

    #[test]
    fn engine_change_needs_override() {
        let a = table("CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) ENGINE=InnoDB");
        let b = table("CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) ENGINE=MyISAM");
        assert!(diff(&a, &b, &DiffOptions::default()).is_rejected());
        assert!(!diff(
            &a,
            &b,
            &DiffOptions {
                no_engine_check: true,
                ..Default::default()
            }
        )
        .is_rejected());
    }

    #[test]
    fn generated_column_change_is_refused() {
        let a = table(
            "CREATE TABLE t (id int NOT NULL, d int GENERATED ALWAYS AS (id * 2) STORED, \
             PRIMARY KEY (id))",
        );
        let b = table(
            "CREATE TABLE t (id int NOT NULL, d int GENERATED ALWAYS AS (id * 3) STORED, \
             PRIMARY KEY (id))",
        );
        assert!(diff(&a, &b, &DiffOptions::default()).is_rejected());
    }

    #[test]
    fn generated_columns_stay_out_of_projection() {
        let a = table(
            "CREATE TABLE t (id int NOT NULL, d int GENERATED ALWAYS AS (id * 2) STORED, \
             PRIMARY KEY (id))",
        );
        let b = table(
            "CREATE TABLE t (id int NOT NULL, d int GENERATED ALWAYS AS (id * 2) STORED, \
             extra int, PRIMARY KEY (id))",
        );
        let d = diff(&a, &b, &DiffOptions::default());
        assert_eq!(d.projection, vec!["id"]);
    }

    #[test]
    fn hash_partition_spelling_is_cosmetic() {
        let a = table(
            "CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) DEFAULT CHARSET=utf8mb4 \
             /*!50100 PARTITION BY HASH(`id`) PARTITIONS 2 */",
        );
        let b = table(
            "CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) \
             DEFAULT CHARACTER SET = utf8mb4 \
             PARTITION BY HASH(`id`) PARTITIONS 2",
        );
        let d = diff(&a, &b, &DiffOptions::default());
        assert_eq!(d.classification, Classification::Identical);
    }
}
