//! Built-in migrations for the media catalog schema.
//!
//! Each migration is written once and builds its backend-specific statements
//! from the injected [`SqlFragments`].

use strata_common::{Error, Result};
use tracing::debug;
use uuid::Uuid;

use crate::dialect::SqlFragments;
use crate::executor::{Transaction, Value};
use crate::registry::{Body, MigrationDefinition, MigrationRegistry};

pub const CREATE_CATALOG: &str = "20200130083147";
pub const ADD_DEFAULT_TRANSCODINGS: &str = "20200706231659";
pub const ADD_DISCS_TO_ALBUM: &str = "20231208182311";

const CREATE_CATALOG_SQL: &str = "\
-- +migrate Up
CREATE TABLE album (
    id VARCHAR(255) PRIMARY KEY NOT NULL,
    name VARCHAR(255) NOT NULL DEFAULT '',
    album_artist VARCHAR(255) NOT NULL DEFAULT '',
    year INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE media_file (
    id VARCHAR(255) PRIMARY KEY NOT NULL,
    album_id VARCHAR(255) NOT NULL REFERENCES album (id) ON DELETE CASCADE,
    path VARCHAR(1024) NOT NULL DEFAULT '',
    title VARCHAR(255) NOT NULL DEFAULT '',
    track_number INTEGER NOT NULL DEFAULT 0,
    disc_number INTEGER NOT NULL DEFAULT 0,
    disc_subtitle VARCHAR(255) NOT NULL DEFAULT ''
);
CREATE INDEX media_file_album_id ON media_file (album_id);
CREATE TABLE transcoding (
    id VARCHAR(255) PRIMARY KEY NOT NULL,
    name VARCHAR(255) NOT NULL UNIQUE,
    target_format VARCHAR(255) NOT NULL UNIQUE,
    default_bit_rate INTEGER NOT NULL DEFAULT 192,
    command VARCHAR(1024) NOT NULL DEFAULT ''
);

-- +migrate Down
DROP TABLE transcoding;
DROP TABLE media_file;
DROP TABLE album;
";

/// A transcoding seeded on first install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transcoding {
    pub name: &'static str,
    pub target_format: &'static str,
    pub default_bit_rate: i64,
    pub command: &'static str,
}

pub const DEFAULT_TRANSCODINGS: [Transcoding; 3] = [
    Transcoding {
        name: "mp3 audio",
        target_format: "mp3",
        default_bit_rate: 192,
        command: "ffmpeg -i %s -ss %t -map 0:a:0 -b:a %bk -v 0 -f mp3 -",
    },
    Transcoding {
        name: "opus audio",
        target_format: "opus",
        default_bit_rate: 128,
        command: "ffmpeg -i %s -ss %t -map 0:a:0 -b:a %bk -v 0 -c:a libopus -f opus -",
    },
    Transcoding {
        name: "aac audio",
        target_format: "aac",
        default_bit_rate: 256,
        command: "ffmpeg -i %s -ss %t -map 0:a:0 -b:a %bk -v 0 -c:a aac -f adts -",
    },
];

/// The shipped migration set, composed in one explicit step.
pub fn registry() -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    for def in definitions()? {
        registry.register(def)?;
    }
    Ok(registry)
}

pub fn definitions() -> Result<Vec<MigrationDefinition>> {
    Ok(vec![
        MigrationDefinition::from_script(CREATE_CATALOG, "create_catalog", CREATE_CATALOG_SQL)?,
        MigrationDefinition::new(
            ADD_DEFAULT_TRANSCODINGS,
            "add_default_transcodings",
            Body::code(seed_transcodings),
            // Seeded rows may have been edited since; they are left in place.
            Body::Noop,
        )?,
        MigrationDefinition::new(
            ADD_DISCS_TO_ALBUM,
            "add_discs_to_album",
            Body::code(add_discs),
            Body::code(drop_discs),
        )?,
    ])
}

fn seed_transcodings(tx: &mut dyn Transaction, sql: &dyn SqlFragments) -> Result<()> {
    let count = tx
        .query_opt("SELECT COUNT(*) FROM transcoding", &[])?
        .ok_or_else(|| Error::Database("transcoding count returned no rows".into()))?
        .i64(0)?;
    if count > 0 {
        debug!("transcoding table already has {count} rows, skipping defaults");
        return Ok(());
    }

    let stmt = format!(
        "INSERT INTO transcoding (id, name, target_format, default_bit_rate, command) \
         VALUES ({}, {}, {}, {}, {})",
        sql.placeholder(1),
        sql.placeholder(2),
        sql.placeholder(3),
        sql.placeholder(4),
        sql.placeholder(5)
    );
    for t in &DEFAULT_TRANSCODINGS {
        tx.execute(
            &stmt,
            &[
                Value::from(Uuid::new_v4().to_string()),
                Value::from(t.name),
                Value::from(t.target_format),
                Value::from(t.default_bit_rate),
                Value::from(t.command),
            ],
        )?;
    }
    Ok(())
}

fn add_discs(tx: &mut dyn Transaction, sql: &dyn SqlFragments) -> Result<()> {
    let column = format!("{} DEFAULT '{{}}'", sql.json_column_type());
    tx.execute_batch(&sql.add_column("album", "discs", &column))?;
    tx.execute_batch(&backfill_discs_sql(sql))
}

fn drop_discs(tx: &mut dyn Transaction, sql: &dyn SqlFragments) -> Result<()> {
    tx.execute_batch(&sql.drop_column("album", "discs"))
}

/// Fill `album.discs` with a `{disc_number: disc_subtitle}` object built from
/// the album's media files. Albums whose only disc is an untitled disc 1 keep
/// the column default.
pub fn backfill_discs_sql(sql: &dyn SqlFragments) -> String {
    let aggregate = sql.json_object_agg("disc_number", "disc_subtitle");
    format!(
        "UPDATE album SET discs = t.discs
FROM (SELECT album_id, {aggregate} AS discs
      FROM (SELECT DISTINCT album_id, disc_number, disc_subtitle
            FROM media_file
            WHERE disc_number > 0
            ORDER BY album_id, disc_number) AS files
      GROUP BY album_id
      HAVING {comparable} <> '{{\"1\":\"\"}}') AS t
WHERE album.id = t.album_id",
        comparable = sql.json_comparable(&aggregate),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::executor::{Connection, Executor};
    use crate::sqlite::SqliteConnection;

    fn run_up(conn: &mut SqliteConnection, def: &MigrationDefinition) {
        let mut tx = conn.begin().unwrap();
        let sql = tx.sql();
        def.up.run(tx.as_mut(), sql).unwrap();
        tx.commit().unwrap();
    }

    fn migrated(upto: usize) -> SqliteConnection {
        let mut conn = SqliteConnection::in_memory().unwrap();
        for def in definitions().unwrap().iter().take(upto) {
            run_up(&mut conn, def);
        }
        conn
    }

    fn discs(conn: &mut SqliteConnection, album: &str) -> serde_json::Value {
        let row = conn
            .query_opt("SELECT discs FROM album WHERE id = ?1", &[Value::from(album)])
            .unwrap()
            .unwrap();
        serde_json::from_str(&row.text(0).unwrap()).unwrap()
    }

    #[test]
    fn registry_is_ordered_and_complete() {
        let registry = registry().unwrap();
        let versions: Vec<String> = registry.versions().iter().map(|v| v.to_string()).collect();
        assert_eq!(
            versions,
            vec![CREATE_CATALOG, ADD_DEFAULT_TRANSCODINGS, ADD_DISCS_TO_ALBUM]
        );
        let transcodings = registry
            .iter()
            .find(|d| d.version.as_str() == ADD_DEFAULT_TRANSCODINGS)
            .unwrap();
        assert!(transcodings.down.is_noop());
    }

    #[test]
    fn seeds_defaults_into_empty_table() {
        let mut conn = migrated(2);
        let rows = conn
            .query("SELECT target_format FROM transcoding ORDER BY target_format", &[])
            .unwrap();
        let formats: Vec<String> = rows.iter().map(|r| r.text(0).unwrap()).collect();
        assert_eq!(formats, vec!["aac", "mp3", "opus"]);
    }

    #[test]
    fn seeding_skips_populated_table() {
        let mut conn = migrated(1);
        conn.execute(
            "INSERT INTO transcoding (id, name, target_format) VALUES ('x', 'custom', 'flac')",
            &[],
        )
        .unwrap();
        run_up(&mut conn, &definitions().unwrap()[1]);

        let count = conn
            .query_opt("SELECT COUNT(*) FROM transcoding", &[])
            .unwrap()
            .unwrap()
            .i64(0)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn backfill_groups_discs_per_album() {
        let mut conn = migrated(2);
        conn.execute_batch(
            "INSERT INTO album (id, name) VALUES ('a1', 'Double'), ('a2', 'Single'), ('a3', 'Empty');
             INSERT INTO media_file (id, album_id, disc_number, disc_subtitle) VALUES
                ('m1', 'a1', 1, ''), ('m2', 'a1', 1, ''), ('m3', 'a1', 2, 'Bonus'),
                ('m4', 'a2', 1, ''),
                ('m5', 'a3', 0, 'ignored');",
        )
        .unwrap();
        run_up(&mut conn, &definitions().unwrap()[2]);

        assert_eq!(discs(&mut conn, "a1"), serde_json::json!({"1": "", "2": "Bonus"}));
        assert_eq!(discs(&mut conn, "a2"), serde_json::json!({}));
        assert_eq!(discs(&mut conn, "a3"), serde_json::json!({}));
    }

    #[test]
    fn discs_down_drops_column() {
        let mut conn = migrated(3);
        let def = &definitions().unwrap()[2];
        let mut tx = conn.begin().unwrap();
        let sql = tx.sql();
        def.down.run(tx.as_mut(), sql).unwrap();
        tx.commit().unwrap();

        assert!(conn.query("SELECT discs FROM album", &[]).is_err());
    }

    #[test]
    fn backfill_statement_differs_per_dialect() {
        let sqlite = backfill_discs_sql(Dialect::Sqlite.sql());
        assert!(sqlite.contains("json_group_object(disc_number, disc_subtitle) AS discs"));
        assert!(sqlite.contains("HAVING json_group_object(disc_number, disc_subtitle) <> '{\"1\":\"\"}'"));

        let pg = backfill_discs_sql(Dialect::Postgres.sql());
        assert!(pg.contains("json_object_agg(disc_number, disc_subtitle) AS discs"));
        assert!(pg.contains("HAVING to_jsonb(json_object_agg(disc_number, disc_subtitle)) <> '{\"1\":\"\"}'"));
    }
}
