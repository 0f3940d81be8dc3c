//! Direct mode: run the DDL file's statements natively, no shadow machinery.

use tracing::info;

use crate::error::Result;
use crate::session::{ConnectOpts, DbSession};

/// Split a script on `;` outside of quoted regions.
fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    // A doubled quote stays inside the literal
                    if chars.peek() == Some(&q) {
                        current.push(q);
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                ';' => {
                    let stmt = current.trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    let stmt = current.trim().to_string();
    if !stmt.is_empty() {
        statements.push(stmt);
    }
    statements
}

/// Execute every statement in `ddl` in order.
pub async fn run_direct(connect: &ConnectOpts, ddl: &str) -> Result<()> {
    let pool = connect.pool();
    let mut session = DbSession::connect(&pool).await?;
    for stmt in split_statements(ddl) {
        info!(stmt = %stmt.lines().next().unwrap_or(""), "executing DDL directly");
        session.exec(&stmt).await?;
    }
    session.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_semicolons_outside_quotes() {
        let stmts = split_statements(
            "CREATE TABLE a (x varchar(10) DEFAULT 'a;b');\nDROP TABLE `weird;name`;\n",
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'a;b'"));
        assert!(stmts[1].contains("`weird;name`"));
    }

    #[test]
    fn trailing_statement_without_semicolon_counts() {
        let stmts = split_statements("SELECT 1; SELECT 2");
        assert_eq!(stmts, vec!["SELECT 1", "SELECT 2"]);
    }
}
