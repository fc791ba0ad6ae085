//! Migration runner shared by both stores (spec.md 4.5): a `schema_migrations`
//! table tracks applied versions; each migration is one atomic transaction
//! verified against a checksum, mirroring the `execute_batch` + versioned
//! schema idiom in `backtest_v2/l2_storage.rs` but generalized to discrete,
//! named steps instead of one baked-in schema string.

use rusqlite::Connection;

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

impl Migration {
    /// Checksum of the migration's SQL bodies. Stored alongside the applied
    /// version so a changed migration file is caught rather than silently
    /// re-skipped.
    fn checksum(&self) -> i64 {
        let mut hash: u64 = 1469598103934665603; // FNV-1a offset basis
        for byte in self.up_sql.bytes().chain(self.down_sql.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        hash as i64
    }
}

fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum INTEGER NOT NULL,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        )",
    )
}

/// Apply every migration in `migrations` (ordered by `version`) that is not
/// yet recorded in `schema_migrations`. A version whose recorded checksum
/// disagrees with the supplied migration's checksum is a fatal mismatch
/// (spec.md 4.5).
pub fn run(conn: &mut Connection, migrations: &[Migration]) -> anyhow::Result<()> {
    ensure_migrations_table(conn)?;

    for migration in migrations {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE version = ?1",
                [migration.version],
                |row| row.get(0),
            )
            .ok();

        match existing {
            Some(checksum) if checksum == migration.checksum() => continue,
            Some(_) => {
                anyhow::bail!(
                    "migration {} ({}) checksum mismatch against applied record",
                    migration.version,
                    migration.name
                );
            }
            None => {
                let tx = conn.transaction()?;
                tx.execute_batch(migration.up_sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, name, checksum) VALUES (?1, ?2, ?3)",
                    rusqlite::params![migration.version, migration.name, migration.checksum()],
                )?;
                tx.commit()?;
                tracing::info!(version = migration.version, name = migration.name, "migration applied");
            }
        }
    }
    Ok(())
}

/// Roll back to (and excluding) `target_version`, applying `down_sql` in
/// reverse order. Used by operational tooling, not by the service's own
/// startup path.
pub fn rollback_to(
    conn: &mut Connection,
    migrations: &[Migration],
    target_version: i64,
) -> anyhow::Result<()> {
    ensure_migrations_table(conn)?;
    let mut applied: Vec<&Migration> = migrations
        .iter()
        .filter(|m| m.version > target_version)
        .collect();
    applied.sort_by_key(|m| std::cmp::Reverse(m.version));

    for migration in applied {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.down_sql)?;
        tx.execute(
            "DELETE FROM schema_migrations WHERE version = ?1",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, "migration rolled back");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIGRATIONS: &[Migration] = &[Migration {
        version: 1,
        name: "create_widgets",
        up_sql: "CREATE TABLE widgets (id INTEGER PRIMARY KEY)",
        down_sql: "DROP TABLE widgets",
    }];

    #[test]
    fn applies_missing_migrations_once() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, MIGRATIONS).unwrap();
        run(&mut conn, MIGRATIONS).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rollback_drops_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn, MIGRATIONS).unwrap();
        rollback_to(&mut conn, MIGRATIONS, 0).unwrap();
        let result = conn.execute("INSERT INTO widgets DEFAULT VALUES", []);
        assert!(result.is_err());
    }
}
