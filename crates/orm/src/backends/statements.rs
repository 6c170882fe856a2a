//! SQL statement generation per dialect
//!
//! Pure string building: identifiers are quoted for the dialect and values
//! are always placeholders, numbered across the whole statement.

use crate::error::{OrmError, OrmResult};

use super::core::SqlDialect;

/// Ordering, paging and locking for a SELECT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectOptions {
    /// Column and descending flag
    pub order: Option<(String, bool)>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub for_update: bool,
}

/// Builds parameterized statements for one dialect
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    dialect: SqlDialect,
}

impl StatementBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn quote(&self, identifier: &str) -> String {
        self.dialect.quote(identifier)
    }

    fn column_list<S: AsRef<str>>(&self, columns: &[S]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c.as_ref()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|idx| self.dialect.parameter_placeholder(idx))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `"a" = $1 AND "b" = $2`, with an optional table alias
    fn conditions(&self, alias: Option<&str>, columns: &[&str], start: usize) -> String {
        columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let column = match alias {
                    Some(alias) => format!("{}.{}", alias, self.quote(column)),
                    None => self.quote(column),
                };
                format!("{} = {}", column, self.dialect.parameter_placeholder(start + i))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn where_clause(&self, alias: Option<&str>, columns: &[&str], start: usize) -> String {
        if columns.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions(alias, columns, start))
        }
    }

    /// Multi-row INSERT with `rows` value groups
    pub fn insert<S: AsRef<str>>(
        &self,
        table: &str,
        columns: &[S],
        rows: usize,
        returning: Option<&str>,
    ) -> String {
        let mut sql = format!("INSERT INTO {}", self.quote(table));
        if columns.is_empty() {
            match self.dialect {
                SqlDialect::MySQL => {
                    let groups = vec!["()"; rows.max(1)].join(", ");
                    sql.push_str(&format!(" () VALUES {}", groups));
                }
                SqlDialect::PostgreSQL | SqlDialect::SQLite => sql.push_str(" DEFAULT VALUES"),
            }
        } else {
            let groups = (0..rows.max(1))
                .map(|row| format!("({})", self.placeholders(row * columns.len(), columns.len())))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ({}) VALUES {}", self.column_list(columns), groups));
        }
        if let Some(column) = returning {
            sql.push_str(&format!(" RETURNING {}", self.quote(column)));
        }
        sql
    }

    /// Dialect upsert. `update` lists the columns overwritten on conflict.
    /// The `key` column of the affected row is reported back on both the
    /// insert and the update path: through `RETURNING`, or on MySQL by
    /// feeding it to `LAST_INSERT_ID()`.
    pub fn upsert<S: AsRef<str>>(
        &self,
        table: &str,
        columns: &[S],
        conflict: Option<&str>,
        update: &[S],
        key: Option<&str>,
    ) -> OrmResult<String> {
        match self.dialect {
            SqlDialect::MySQL => {
                let mut sql = self.insert(table, columns, 1, None);
                if update.is_empty() {
                    sql = sql.replacen("INSERT INTO", "INSERT IGNORE INTO", 1);
                } else {
                    let mut assignments = update
                        .iter()
                        .map(|c| {
                            let column = self.quote(c.as_ref());
                            format!("{} = VALUES({})", column, column)
                        })
                        .collect::<Vec<_>>();
                    if let Some(key) = key {
                        let key = self.quote(key);
                        assignments.push(format!("{} = LAST_INSERT_ID({})", key, key));
                    }
                    sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", ")));
                }
                Ok(sql)
            }
            SqlDialect::PostgreSQL | SqlDialect::SQLite => {
                let conflict = conflict.ok_or_else(|| {
                    OrmError::Programmer(format!(
                        "insert_or_update on {} needs a conflict column",
                        match self.dialect {
                            SqlDialect::PostgreSQL => "PostgreSQL",
                            _ => "SQLite",
                        }
                    ))
                })?;
                let mut sql = self.insert(table, columns, 1, None);
                if update.is_empty() {
                    sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", self.quote(conflict)));
                } else {
                    let assignments = update
                        .iter()
                        .map(|c| {
                            let column = self.quote(c.as_ref());
                            format!("{} = EXCLUDED.{}", column, column)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(
                        " ON CONFLICT ({}) DO UPDATE SET {}",
                        self.quote(conflict),
                        assignments
                    ));
                }
                if let Some(column) = key {
                    sql.push_str(&format!(" RETURNING {}", self.quote(column)));
                }
                Ok(sql)
            }
        }
    }

    /// `UPDATE t SET a = ?, b = ? WHERE k = ?`
    pub fn update<S: AsRef<str>>(&self, table: &str, set: &[S], where_columns: &[&str]) -> String {
        let assignments = set
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote(c.as_ref()), self.dialect.parameter_placeholder(i)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {}{}",
            self.quote(table),
            assignments,
            self.where_clause(None, where_columns, set.len())
        )
    }

    /// `UPDATE t SET c = NULL WHERE c = ?`
    pub fn set_null(&self, table: &str, column: &str) -> String {
        format!(
            "UPDATE {} SET {} = NULL WHERE {} = {}",
            self.quote(table),
            self.quote(column),
            self.quote(column),
            self.dialect.parameter_placeholder(0)
        )
    }

    pub fn delete(&self, table: &str, where_columns: &[&str]) -> String {
        format!(
            "DELETE FROM {}{}",
            self.quote(table),
            self.where_clause(None, where_columns, 0)
        )
    }

    /// `DELETE FROM t WHERE a = ? AND b IN (?, ?)`
    pub fn delete_in(&self, table: &str, column: &str, in_column: &str, count: usize) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {} AND {} IN ({})",
            self.quote(table),
            self.quote(column),
            self.dialect.parameter_placeholder(0),
            self.quote(in_column),
            self.placeholders(1, count)
        )
    }

    pub fn count(&self, table: &str, where_columns: &[&str]) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.quote(table),
            self.where_clause(None, where_columns, 0)
        )
    }

    pub fn select<S: AsRef<str>>(
        &self,
        table: &str,
        columns: &[S],
        where_columns: &[&str],
        options: &SelectOptions,
    ) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            self.column_list(columns),
            self.quote(table),
            self.where_clause(None, where_columns, 0)
        );
        self.push_tail(&mut sql, None, options);
        sql
    }

    /// Rows of `target` linked to one owner through a join table
    #[allow(clippy::too_many_arguments)]
    pub fn select_through<S: AsRef<str>>(
        &self,
        target: &str,
        columns: &[S],
        target_pk: &str,
        join_table: &str,
        join_target_column: &str,
        join_owner_column: &str,
        options: &SelectOptions,
    ) -> String {
        let columns = columns
            .iter()
            .map(|c| format!("T0.{}", self.quote(c.as_ref())))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {} T0 INNER JOIN {} T1 ON T1.{} = T0.{}{}",
            columns,
            self.quote(target),
            self.quote(join_table),
            self.quote(join_target_column),
            self.quote(target_pk),
            self.where_clause(Some("T1"), &[join_owner_column], 0)
        );
        self.push_tail(&mut sql, Some("T0"), options);
        sql
    }

    fn push_tail(&self, sql: &mut String, alias: Option<&str>, options: &SelectOptions) {
        if let Some((column, descending)) = &options.order {
            let column = match alias {
                Some(alias) => format!("{}.{}", alias, self.quote(column)),
                None => self.quote(column),
            };
            sql.push_str(&format!(
                " ORDER BY {} {}",
                column,
                if *descending { "DESC" } else { "ASC" }
            ));
        }

        match (options.limit, options.offset) {
            (Some(limit), 0) => sql.push_str(&format!(" LIMIT {}", limit)),
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (None, 0) => {}
            (None, offset) => match self.dialect {
                SqlDialect::PostgreSQL => sql.push_str(&format!(" OFFSET {}", offset)),
                SqlDialect::MySQL => sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", offset)),
                SqlDialect::SQLite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            },
        }

        if options.for_update {
            if let Some(clause) = self.dialect.locking_clause() {
                sql.push(' ');
                sql.push_str(clause);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> StatementBuilder {
        StatementBuilder::new(SqlDialect::PostgreSQL)
    }

    fn mysql() -> StatementBuilder {
        StatementBuilder::new(SqlDialect::MySQL)
    }

    fn sqlite() -> StatementBuilder {
        StatementBuilder::new(SqlDialect::SQLite)
    }

    #[test]
    fn test_insert_statements() {
        assert_eq!(
            mysql().insert("profile", &["age"], 1, None),
            "INSERT INTO `profile` (`age`) VALUES (?)"
        );
        assert_eq!(
            pg().insert("user", &["name", "profile_id"], 2, Some("id")),
            "INSERT INTO \"user\" (\"name\", \"profile_id\") VALUES ($1, $2), ($3, $4) RETURNING \"id\""
        );
        let empty: [&str; 0] = [];
        assert_eq!(sqlite().insert("tick", &empty, 1, None), "INSERT INTO \"tick\" DEFAULT VALUES");
        assert_eq!(mysql().insert("tick", &empty, 1, None), "INSERT INTO `tick` () VALUES ()");
    }

    #[test]
    fn test_upsert_statements() {
        assert_eq!(
            pg().upsert("user", &["email", "name"], Some("email"), &["name"], Some("id"))
                .unwrap(),
            "INSERT INTO \"user\" (\"email\", \"name\") VALUES ($1, $2) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\" RETURNING \"id\""
        );
        assert_eq!(
            mysql().upsert("user", &["email", "name"], None, &["name"], None).unwrap(),
            "INSERT INTO `user` (`email`, `name`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `name` = VALUES(`name`)"
        );
        assert_eq!(
            mysql().upsert("user", &["email", "name"], None, &["name"], Some("id")).unwrap(),
            "INSERT INTO `user` (`email`, `name`) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE `name` = VALUES(`name`), `id` = LAST_INSERT_ID(`id`)"
        );
        assert_eq!(
            sqlite()
                .upsert("user", &["email", "name"], Some("email"), &["name"], Some("id"))
                .unwrap(),
            "INSERT INTO \"user\" (\"email\", \"name\") VALUES (?, ?) \
             ON CONFLICT (\"email\") DO UPDATE SET \"name\" = EXCLUDED.\"name\" RETURNING \"id\""
        );
        let err = sqlite()
            .upsert("user", &["email"], None, &["email"], None)
            .unwrap_err();
        assert!(err.is_programmer_error());
    }

    #[test]
    fn test_update_and_delete_numbering() {
        assert_eq!(
            pg().update("user", &["name", "age"], &["id"]),
            "UPDATE \"user\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(pg().delete("user", &["id"]), "DELETE FROM \"user\" WHERE \"id\" = $1");
        assert_eq!(
            pg().delete_in("post_tags", "post_id", "tag_id", 2),
            "DELETE FROM \"post_tags\" WHERE \"post_id\" = $1 AND \"tag_id\" IN ($2, $3)"
        );
        assert_eq!(
            mysql().set_null("user", "profile_id"),
            "UPDATE `user` SET `profile_id` = NULL WHERE `profile_id` = ?"
        );
    }

    #[test]
    fn test_select_locking_and_paging() {
        let locked = SelectOptions {
            for_update: true,
            ..Default::default()
        };
        assert_eq!(
            pg().select("user", &["id", "name"], &["id"], &locked),
            "SELECT \"id\", \"name\" FROM \"user\" WHERE \"id\" = $1 FOR UPDATE"
        );
        assert_eq!(
            sqlite().select("user", &["id"], &["id"], &locked),
            "SELECT \"id\" FROM \"user\" WHERE \"id\" = ?"
        );

        let paged = SelectOptions {
            order: Some(("name".into(), true)),
            limit: Some(10),
            offset: 20,
            for_update: false,
        };
        assert_eq!(
            mysql().select("post", &["id"], &["user_id"], &paged),
            "SELECT `id` FROM `post` WHERE `user_id` = ? ORDER BY `name` DESC LIMIT 10 OFFSET 20"
        );
        let offset_only = SelectOptions {
            offset: 5,
            ..Default::default()
        };
        assert_eq!(
            sqlite().select("post", &["id"], &[], &offset_only),
            "SELECT \"id\" FROM \"post\" LIMIT -1 OFFSET 5"
        );
    }

    #[test]
    fn test_select_through_join_table() {
        let options = SelectOptions {
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(
            pg().select_through("tag", &["id", "name"], "id", "post_tags", "tag_id", "post_id", &options),
            "SELECT T0.\"id\", T0.\"name\" FROM \"tag\" T0 INNER JOIN \"post_tags\" T1 \
             ON T1.\"tag_id\" = T0.\"id\" WHERE T1.\"post_id\" = $1 LIMIT 1000"
        );
        assert_eq!(
            mysql().count("post_tags", &["post_id", "tag_id"]),
            "SELECT COUNT(*) FROM `post_tags` WHERE `post_id` = ? AND `tag_id` = ?"
        );
    }
}
