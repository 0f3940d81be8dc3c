//! Change capture: the delta table plus the three triggers on the source.
//!
//! Triggers run inside the source transaction, so every committed DML shows
//! up in the delta table in commit order; `chg_id` is the sole total order
//! the replayer relies on. The delta table is created strictly before the
//! triggers and dropped strictly after them, which keeps the invariant that
//! triggers never reference a missing table.

use tracing::info;

use crate::error::Result;
use crate::idents::RunIdents;
use crate::schema::{Column, Table};
use crate::session::DbSession;
use crate::sqlgen;

/// Key columns of the source table, the by-value payload of the delta rows.
fn pk_columns(source: &Table) -> Vec<Column> {
    let names = source.copy_key_columns();
    source
        .columns
        .iter()
        .filter(|c| names.contains(&c.name))
        .cloned()
        .collect()
}

/// Create the delta table and install the three AFTER triggers.
pub async fn install(session: &mut DbSession, idents: &RunIdents, source: &Table) -> Result<()> {
    let pk_cols = pk_columns(source);
    let pk_names = source.copy_key_columns();

    session
        .exec(&sqlgen::create_delta_table(&idents.delta, &pk_cols))
        .await?;
    info!(delta = %idents.delta, "created delta table");

    for stmt in [
        sqlgen::create_insert_trigger(&idents.trigger_ins, &idents.source, &idents.delta, &pk_names),
        sqlgen::create_update_trigger(&idents.trigger_upd, &idents.source, &idents.delta, &pk_names),
        sqlgen::create_delete_trigger(&idents.trigger_del, &idents.source, &idents.delta, &pk_names),
    ] {
        session.exec(&stmt).await?;
    }
    info!(source = %idents.source, "installed change-capture triggers");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse::{parse_create, OtherStatements};

    #[test]
    fn pk_columns_preserve_declaration_order() {
        let t = parse_create(
            "CREATE TABLE t (b int NOT NULL, a int NOT NULL, v varchar(10), PRIMARY KEY (a, b))",
            OtherStatements::Reject,
        )
        .unwrap();
        let cols = pk_columns(&t);
        // Table column order, not index order: the delta payload mirrors the
        // source column layout
        assert_eq!(
            cols.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
    }
}
