//! Cross-module checks: parser + differ + statement builders working
//! together the way the copy pipeline uses them.

use osc_cli::idents::RunIdents;
use osc_cli::schema::diff::{diff, Classification, DiffOptions};
use osc_cli::schema::parse::{parse_create, OtherStatements};
use osc_cli::schema::Table;
use osc_cli::sqlgen;
use std::path::Path;

fn table(sql: &str) -> Table {
    parse_create(sql, OtherStatements::Reject).expect("fixture should parse")
}

#[test]
fn add_column_scenario_is_safe() {
    // before: table1(id INT PK); after: + data VARCHAR(10) DEFAULT NULL
    let before = table("CREATE TABLE table1 (id int NOT NULL, PRIMARY KEY (id))");
    let after = table(
        "CREATE TABLE table1 (id int NOT NULL, data varchar(10) DEFAULT NULL, PRIMARY KEY (id))",
    );
    let d = diff(&before, &after, &DiffOptions::default());
    assert_eq!(d.classification, Classification::SafeCopy);
    assert_eq!(d.projection, vec!["id"]);
}

#[test]
fn pk_removal_scenario_is_rejected() {
    let before = table(
        "CREATE TABLE t (id1 int NOT NULL, id2 int NOT NULL, id3 int NOT NULL, \
         v varchar(16), PRIMARY KEY (id1, id2, id3))",
    );
    let after = table(
        "CREATE TABLE t (id1 int NOT NULL, id2 int NOT NULL, id3 int NOT NULL, \
         v varchar(16), PRIMARY KEY (id2, id3))",
    );
    let d = diff(&before, &after, &DiffOptions::default());
    assert_eq!(d.classification, Classification::Rejected);
}

#[test]
fn collation_change_scenario_is_rejected_by_default() {
    let before = table(
        "CREATE TABLE t (data varchar(10) NOT NULL, PRIMARY KEY (data)) \
         ENGINE=InnoDB DEFAULT CHARSET=latin1",
    );
    let after = table(
        "CREATE TABLE t (data varchar(10) COLLATE latin1_general_cs NOT NULL, \
         PRIMARY KEY (data)) ENGINE=InnoDB DEFAULT CHARSET=latin1",
    );
    assert_eq!(
        diff(&before, &after, &DiffOptions::default()).classification,
        Classification::Rejected
    );
    assert_ne!(
        diff(
            &before,
            &after,
            &DiffOptions {
                eliminate_dups: true,
                ..Default::default()
            }
        )
        .classification,
        Classification::Rejected
    );
}

#[test]
fn hash_partitioned_table_with_cosmetic_charset_is_identical() {
    let before = table(
        "CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) ENGINE=InnoDB \
         DEFAULT CHARSET=utf8mb4 \
         /*!50100 PARTITION BY HASH (`id`) PARTITIONS 2 */",
    );
    let after = table(
        "CREATE TABLE t (id int NOT NULL, PRIMARY KEY (id)) ENGINE=InnoDB \
         DEFAULT CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci \
         PARTITION BY HASH (`id`) PARTITIONS 2",
    );
    let d = diff(&before, &after, &DiffOptions::default());
    assert_eq!(d.classification, Classification::Identical);
    // The partition survives the shadow-table DDL
    let shadow_sql = after.to_sql_named("_t_new", false);
    assert!(shadow_sql.contains("PARTITION BY HASH"));
    // ... unless the run strips it
    let stripped = after.to_sql_named("_t_new", true);
    assert!(!stripped.contains("PARTITION BY"));
}

#[test]
fn unicode_table_name_flows_through_every_identifier() {
    let name = "(╯°□°）╯︵ ┻━┻";
    let before = table(&format!(
        "CREATE TABLE `{name}` (id int NOT NULL, PRIMARY KEY (id))"
    ));
    assert_eq!(before.name, name);

    let idents = RunIdents::new(&before.name, Path::new("/tmp"), "0badc0de", 7);
    assert_eq!(idents.shadow, format!("_{name}_new"));
    assert_eq!(idents.delta, format!("_{name}_chg"));

    // Every generated statement quotes the identifiers
    let trigger = sqlgen::create_insert_trigger(
        &idents.trigger_ins,
        &idents.source,
        &idents.delta,
        &before.pk_column_names(),
    );
    assert!(trigger.contains(&format!("`_{name}_chg_ins`")));
    assert!(trigger.contains(&format!("AFTER INSERT ON `{name}`")));

    let rename = sqlgen::rename_cutover(&idents.source, &idents.old, &idents.shadow);
    assert!(rename.contains(&format!("`{name}` TO `_{name}_old`")));
}

#[test]
fn parse_unparse_reparse_yields_equal_schema() {
    let fixtures = [
        "CREATE TABLE t1 (id int NOT NULL AUTO_INCREMENT, PRIMARY KEY (id)) ENGINE=InnoDB",
        "CREATE TABLE t2 (a int NOT NULL, b varchar(100) DEFAULT 'x', c enum('p','q') NOT NULL, \
         PRIMARY KEY (a), KEY ix_b (b(20))) DEFAULT CHARSET=latin1",
        "CREATE TABLE t3 (id bigint unsigned NOT NULL, created timestamp NOT NULL \
         DEFAULT CURRENT_TIMESTAMP, PRIMARY KEY (id)) \
         PARTITION BY RANGE (id) (PARTITION p0 VALUES LESS THAN (1000), \
         PARTITION p1 VALUES LESS THAN MAXVALUE)",
    ];
    for fixture in fixtures {
        let parsed = table(fixture);
        let reparsed = table(&parsed.to_sql());
        assert!(
            parsed.semantically_equal(&reparsed),
            "round-trip changed: {fixture}"
        );
    }
}

#[test]
fn delta_table_ddl_matches_replay_expectations() {
    let source = table(
        "CREATE TABLE orders (region int NOT NULL, seq bigint NOT NULL, note text, \
         PRIMARY KEY (region, seq))",
    );
    let idents = RunIdents::new(&source.name, Path::new("/tmp"), "feedf00d", 9);
    let pk = source.pk_column_names();

    let batch = sqlgen::select_delta_batch(&idents.delta, &pk, 500);
    assert!(batch.contains("`chg_id`, `chg_type`, `region`, `seq`"));
    assert!(batch.contains("ORDER BY `chg_id` LIMIT 500"));

    let replace = sqlgen::replay_replace_row(
        &idents.shadow,
        &idents.source,
        &["region".into(), "seq".into(), "note".into()],
        &pk,
    );
    assert!(replace.starts_with("REPLACE INTO `_orders_new`"));
    assert!(replace.contains("SELECT `region`, `seq`, `note` FROM `orders`"));
    assert!(replace.ends_with("WHERE `region` = ? AND `seq` = ?"));

    let delete = sqlgen::replay_delete_row(&idents.shadow, &pk);
    assert_eq!(
        delete,
        "DELETE FROM `_orders_new` WHERE `region` = ? AND `seq` = ?"
    );
}
