//! SQL statement builders.
//!
//! Every statement the tool sends to the server is assembled here, so that
//! identifier quoting lives in exactly one place. Identifiers are wrapped in
//! backticks with embedded backticks doubled; they may contain arbitrary
//! UTF-8 (see the unicode tests at the bottom).

use crate::schema::Column;

/// Escape backticks inside an identifier.
pub fn escape(name: &str) -> String {
    name.replace('`', "``")
}

/// Quote an identifier with backticks.
pub fn quote(name: &str) -> String {
    format!("`{}`", escape(name))
}

/// Quote a string literal. Outfile paths cannot be bound as parameters
/// (`LOAD DATA` and `INTO OUTFILE` are not preparable), so they are inlined
/// with this.
pub fn quote_str(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for c in value.chars() {
        match c {
            '\'' => escaped.push_str("\\'"),
            '\\' => escaped.push_str("\\\\"),
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(c),
        }
    }
    escaped.push('\'');
    escaped
}

/// Comma-separated quoted column list.
pub fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column list with a row-alias prefix, e.g. ``NEW.`id`, NEW.`a` ``.
fn prefixed_list(columns: &[String], prefix: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", prefix, quote(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `` `l`.`c` = `r`.`c` `` terms joined by `separator`.
pub fn match_clause(left: &str, right: &str, columns: &[String], separator: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{} = {}.{}", quote(left), quote(c), quote(right), quote(c)))
        .collect::<Vec<_>>()
        .join(separator)
}

/// Lexicographic tuple comparison `(c0, c1, ...) > (v0, v1, ...)` expanded
/// into the OR-of-ANDs form the optimizer can use with a composite index.
pub fn range_start_condition(columns: &[String], values: &[String]) -> String {
    let mut terms = Vec::with_capacity(columns.len());
    for i in 0..columns.len() {
        let gt = format!("{} > {}", quote(&columns[i]), values[i]);
        if i == 0 {
            terms.push(format!("( {gt} )"));
        } else {
            let eq = (0..i)
                .map(|j| format!("{} = {}", quote(&columns[j]), values[j]))
                .collect::<Vec<_>>()
                .join(" AND ");
            terms.push(format!("( {gt} AND {eq} )"));
        }
    }
    terms.join(" OR ")
}

/// Session variable names used to carry chunk boundaries server-side.
pub fn range_vars(pk_count: usize, kind: &str) -> Vec<String> {
    (0..pk_count)
        .map(|i| format!("@osc_{kind}_{i}"))
        .collect()
}

pub fn show_create_table(table: &str) -> String {
    format!("SHOW CREATE TABLE {}", quote(table))
}

pub fn table_existence() -> &'static str {
    "SELECT 1 FROM information_schema.tables \
     WHERE table_schema = ? AND table_name = ?"
}

pub fn trigger_existence() -> &'static str {
    "SELECT trigger_name FROM information_schema.triggers \
     WHERE event_object_schema = ? AND event_object_table = ?"
}

pub fn foreign_key_count() -> &'static str {
    "SELECT COUNT(*) AS cnt \
     FROM information_schema.referential_constraints rc \
     WHERE rc.constraint_schema = ? \
       AND (rc.table_name = ? OR rc.referenced_table_name = ?)"
}

pub fn get_lock() -> &'static str {
    "SELECT GET_LOCK(?, 0) AS locked"
}

pub fn release_lock() -> &'static str {
    "SELECT RELEASE_LOCK(?) AS released"
}

/// Connection id currently holding a named lock, NULL when free. Cleanup
/// uses this to find the running schema change on the instance.
pub fn is_used_lock() -> &'static str {
    "SELECT IS_USED_LOCK(?) AS holder"
}

/// Kill a whole connection, releasing its named locks; [`kill_query`] only
/// aborts the in-flight statement.
pub fn kill_connection(thread_id: u64) -> String {
    format!("KILL {thread_id}")
}

/// Delta-table DDL: auto-increment change id, change type, the source PK
/// columns copied by value, and a change timestamp.
pub fn create_delta_table(delta: &str, pk_columns: &[Column]) -> String {
    let pk_defs: Vec<String> = pk_columns
        .iter()
        .map(|c| {
            // Copied by value only: no defaults, auto-increment or comments
            let null = if c.nullable { "NULL" } else { "NOT NULL" };
            format!("{} {} {null}", quote(&c.name), c.sql_type.canonical_sql())
        })
        .collect();
    format!(
        "CREATE TABLE {} (\
         `chg_id` BIGINT AUTO_INCREMENT PRIMARY KEY, \
         `chg_type` TINYINT NOT NULL, \
         {}, \
         `chg_ts` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP\
         ) ENGINE=InnoDB",
        quote(delta),
        pk_defs.join(", ")
    )
}

pub const CHG_INSERT: u8 = 1;
pub const CHG_UPDATE: u8 = 2;
pub const CHG_DELETE: u8 = 3;

pub fn create_insert_trigger(trigger: &str, source: &str, delta: &str, pk: &[String]) -> String {
    format!(
        "CREATE TRIGGER {} AFTER INSERT ON {} FOR EACH ROW \
         INSERT INTO {} (`chg_type`, {}) VALUES ({CHG_INSERT}, {})",
        quote(trigger),
        quote(source),
        quote(delta),
        quote_list(pk),
        prefixed_list(pk, "NEW"),
    )
}

pub fn create_delete_trigger(trigger: &str, source: &str, delta: &str, pk: &[String]) -> String {
    format!(
        "CREATE TRIGGER {} AFTER DELETE ON {} FOR EACH ROW \
         INSERT INTO {} (`chg_type`, {}) VALUES ({CHG_DELETE}, {})",
        quote(trigger),
        quote(source),
        quote(delta),
        quote_list(pk),
        prefixed_list(pk, "OLD"),
    )
}

/// Update trigger: a PK-preserving update records one update-new row; a
/// PK-changing update records delete-of-old plus insert-of-new.
pub fn create_update_trigger(trigger: &str, source: &str, delta: &str, pk: &[String]) -> String {
    let pk_unchanged = pk
        .iter()
        .map(|c| format!("OLD.{0} = NEW.{0}", quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "CREATE TRIGGER {trg} AFTER UPDATE ON {src} FOR EACH ROW \
         IF ({pk_unchanged}) THEN \
         INSERT INTO {delta} (`chg_type`, {cols}) VALUES ({CHG_UPDATE}, {new_vals}); \
         ELSE \
         INSERT INTO {delta} (`chg_type`, {cols}) VALUES ({CHG_DELETE}, {old_vals}), ({CHG_INSERT}, {new_vals}); \
         END IF",
        trg = quote(trigger),
        src = quote(source),
        delta = quote(delta),
        cols = quote_list(pk),
        new_vals = prefixed_list(pk, "NEW"),
        old_vals = prefixed_list(pk, "OLD"),
    )
}

/// Chunked dump: key columns are selected through assignments into session
/// variables so the chunk boundary survives server-side, the rest of the
/// projection follows plainly. `force_index` names the key index the scan
/// rides (`PRIMARY`, or the unique index standing in for it). The outfile
/// path is inlined as a quoted literal because `INTO OUTFILE` cannot be
/// prepared.
#[allow(clippy::too_many_arguments)]
pub fn select_chunk_into_outfile(
    source: &str,
    pk: &[String],
    non_pk_projection: &[String],
    chunk_size: u64,
    use_where: bool,
    additional_where: Option<&str>,
    force_index: &str,
    outfile: &str,
) -> String {
    let end_vars = range_vars(pk.len(), "end");
    let assigns = pk
        .iter()
        .zip(&end_vars)
        .map(|(c, v)| format!("{v} := {}", quote(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut select_list = assigns;
    if !non_pk_projection.is_empty() {
        select_list = format!("{select_list}, {}", quote_list(non_pk_projection));
    }
    let range = if use_where {
        let start_vars = range_vars(pk.len(), "start");
        Some(range_start_condition(pk, &start_vars))
    } else {
        None
    };
    let where_clause = match (range, additional_where) {
        (Some(r), Some(w)) => format!("WHERE ({w}) AND ({r}) "),
        (Some(r), None) => format!("WHERE {r} "),
        (None, Some(w)) => format!("WHERE ({w}) "),
        (None, None) => String::new(),
    };
    format!(
        "SELECT {select_list} FROM {} FORCE INDEX ({}) {where_clause}\
         ORDER BY {} LIMIT {chunk_size} INTO OUTFILE {}",
        quote(source),
        quote(force_index),
        quote_list(pk),
        quote_str(outfile),
    )
}

/// Roll the chunk window: next chunk starts where this one ended.
pub fn advance_range_start(pk_count: usize) -> String {
    let pairs = range_vars(pk_count, "start")
        .into_iter()
        .zip(range_vars(pk_count, "end"))
        .map(|(s, e)| format!("{s} := {e}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {pairs}")
}

pub fn load_chunk(
    shadow: &str,
    pk: &[String],
    non_pk_projection: &[String],
    replace: bool,
    outfile: &str,
) -> String {
    let mut columns = pk.to_vec();
    columns.extend_from_slice(non_pk_projection);
    let replace = if replace { "REPLACE " } else { "" };
    format!(
        "LOAD DATA INFILE {} {replace}INTO TABLE {} CHARACTER SET binary ({})",
        quote_str(outfile),
        quote(shadow),
        quote_list(&columns),
    )
}

/// Replay a captured insert/update: re-read the current source row and
/// REPLACE it into the shadow. Affects zero rows when the source row has
/// vanished since capture.
pub fn replay_replace_row(shadow: &str, source: &str, projection: &[String], pk: &[String]) -> String {
    let pk_match = pk
        .iter()
        .map(|c| format!("{} = ?", quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "REPLACE INTO {} ({cols}) SELECT {cols} FROM {} WHERE {pk_match}",
        quote(shadow),
        quote(source),
        cols = quote_list(projection),
    )
}

pub fn replay_delete_row(shadow: &str, pk: &[String]) -> String {
    let pk_match = pk
        .iter()
        .map(|c| format!("{} = ?", quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("DELETE FROM {} WHERE {pk_match}", quote(shadow))
}

pub fn select_delta_batch(delta: &str, pk: &[String], batch: u64) -> String {
    format!(
        "SELECT `chg_id`, `chg_type`, {} FROM {} \
         WHERE `chg_id` > ? ORDER BY `chg_id` LIMIT {batch}",
        quote_list(pk),
        quote(delta),
    )
}

pub fn count_delta_backlog(delta: &str) -> String {
    format!(
        "SELECT COUNT(*) AS backlog FROM {} WHERE `chg_id` > ?",
        quote(delta)
    )
}

pub fn lock_tables_write(tables: &[String]) -> String {
    let list = tables
        .iter()
        .map(|t| format!("{} WRITE", quote(t)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("LOCK TABLES {list}")
}

/// The atomic cutover rename: source out of the way, shadow into place.
pub fn rename_cutover(source: &str, old: &str, shadow: &str) -> String {
    format!(
        "RENAME TABLE {} TO {}, {} TO {}",
        quote(source),
        quote(old),
        quote(shadow),
        quote(source),
    )
}

pub fn drop_table_if_exists(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote(table))
}

pub fn drop_trigger_if_exists(trigger: &str) -> String {
    format!("DROP TRIGGER IF EXISTS {}", quote(trigger))
}

/// Whole-table checksum over the shared projection: row count plus one
/// order-insensitive CRC accumulator per column.
pub fn checksum_table(table: &str, columns: &[String]) -> String {
    let sums = columns
        .iter()
        .map(|c| format!("BIT_XOR(CRC32({})) AS {}", quote(c), quote(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT COUNT(*) AS cnt, {sums} FROM {}", quote(table))
}

pub fn kill_query(thread_id: u32) -> String {
    format!("KILL QUERY {thread_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_doubles_backticks_and_keeps_unicode() {
        assert_eq!(quote("a`b"), "`a``b`");
        assert_eq!(quote("(╯°□°）╯︵ ┻━┻"), "`(╯°□°）╯︵ ┻━┻`");
    }

    #[test]
    fn range_condition_expands_composite_pk() {
        let cols = vec!["a".to_string(), "b".to_string()];
        let vals = vec!["@osc_start_0".to_string(), "@osc_start_1".to_string()];
        assert_eq!(
            range_start_condition(&cols, &vals),
            "( `a` > @osc_start_0 ) OR ( `b` > @osc_start_1 AND `a` = @osc_start_0 )"
        );
    }

    #[test]
    fn update_trigger_splits_pk_change() {
        let sql = create_update_trigger("_t_chg_upd", "t", "_t_chg", &["id".to_string()]);
        assert!(sql.contains("IF (OLD.`id` = NEW.`id`) THEN"));
        assert!(sql.contains(&format!("VALUES ({CHG_UPDATE}, NEW.`id`)")));
        assert!(sql.contains(&format!(
            "VALUES ({CHG_DELETE}, OLD.`id`), ({CHG_INSERT}, NEW.`id`)"
        )));
    }

    #[test]
    fn chunk_dump_uses_session_variables() {
        let sql = select_chunk_into_outfile(
            "t",
            &["id".to_string()],
            &["data".to_string()],
            500,
            true,
            None,
            "PRIMARY",
            "/tmp/_t_x/chunk.1",
        );
        assert!(sql.contains("@osc_end_0 := `id`, `data`"));
        assert!(sql.contains("FORCE INDEX (`PRIMARY`)"));
        assert!(sql.contains("`id` > @osc_start_0"));
        assert!(sql.contains("ORDER BY `id` LIMIT 500 INTO OUTFILE '/tmp/_t_x/chunk.1'"));
    }

    #[test]
    fn chunk_dump_forces_the_fallback_unique_index_by_name() {
        let sql = select_chunk_into_outfile(
            "t",
            &["token".to_string()],
            &[],
            500,
            false,
            None,
            "ux_token",
            "/tmp/out",
        );
        assert!(sql.contains("FORCE INDEX (`ux_token`)"));
        assert!(!sql.contains("PRIMARY"));
    }

    #[test]
    fn chunk_dump_ands_additional_where() {
        let sql = select_chunk_into_outfile(
            "t",
            &["id".to_string()],
            &[],
            100,
            true,
            Some("created_at > '2024-01-01'"),
            "PRIMARY",
            "/tmp/out",
        );
        assert!(sql.contains("WHERE (created_at > '2024-01-01') AND (( `id` > @osc_start_0 ))"));
    }

    #[test]
    fn load_chunk_is_binary_and_lists_pk_first() {
        let sql = load_chunk(
            "_t_new",
            &["id".to_string()],
            &["data".to_string()],
            false,
            "/tmp/out",
        );
        assert_eq!(
            sql,
            "LOAD DATA INFILE '/tmp/out' INTO TABLE `_t_new` CHARACTER SET binary (`id`, `data`)"
        );
        let replace = load_chunk("_t_new", &["id".to_string()], &[], true, "/tmp/out");
        assert!(replace.contains("LOAD DATA INFILE '/tmp/out' REPLACE INTO TABLE"));
    }

    #[test]
    fn string_literals_escape_quotes_and_backslashes() {
        assert_eq!(quote_str("/tmp/a'b"), "'/tmp/a\\'b'");
        assert_eq!(quote_str("C:\\tmp"), "'C:\\\\tmp'");
    }

    #[test]
    fn cutover_rename_is_one_statement() {
        assert_eq!(
            rename_cutover("t", "_t_old", "_t_new"),
            "RENAME TABLE `t` TO `_t_old`, `_t_new` TO `t`"
        );
    }
}
