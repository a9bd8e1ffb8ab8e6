//! SQLite Backend
//!
//! File-based persistent storage using SQLite.
//! Nested scopes map onto `SAVEPOINT` / `RELEASE` / `ROLLBACK TO`; one
//! thread at a time owns the connection's savepoint stack.
//! Live objects are stored as JSON field maps, one row per (type, pk).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::scopes::ScopeOwner;
use super::{merge_for_save, sort_by_pk};
use crate::domain::{
    FieldMap, HistoryOrder, ModelCatalog, ModelInstance, ModerationStatus, NewRevision,
    NewVersion, ObjectRef, ObjectStore, Revision, RevisionId, SavepointId, Transactional,
    Version, VersionId, VersionQuery, VersionRepository,
};
use crate::error::{ReversionError, Result};

const VERSION_COLUMNS: &str = "v.id, v.revision_id, v.object_type, v.object_id, v.object_id_int,
     v.format, v.serialized_data, v.object_repr, v.status";

/// SQLite-based backend
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    catalog: Arc<ModelCatalog>,
    scopes: Arc<ScopeOwner>,
    next_savepoint: Arc<AtomicU64>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn new(db_path: impl AsRef<Path>, catalog: ModelCatalog) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, catalog)
    }

    /// In-memory database (for testing)
    pub fn in_memory(catalog: ModelCatalog) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, catalog)
    }

    fn with_connection(conn: Connection, catalog: ModelCatalog) -> Result<Self> {
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
            catalog: Arc::new(catalog),
            scopes: Arc::new(ScopeOwner::default()),
            next_savepoint: Arc::new(AtomicU64::new(1)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS revisions (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 manager_slug TEXT NOT NULL,
                 date_created INTEGER NOT NULL,
                 date_updated INTEGER NOT NULL,
                 user_id TEXT,
                 comment TEXT NOT NULL DEFAULT ''
             );
             CREATE INDEX IF NOT EXISTS idx_revisions_slug ON revisions(manager_slug);
             CREATE INDEX IF NOT EXISTS idx_revisions_created ON revisions(date_created);

             CREATE TABLE IF NOT EXISTS versions (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 revision_id INTEGER NOT NULL REFERENCES revisions(id),
                 object_type TEXT NOT NULL,
                 object_id TEXT NOT NULL,
                 object_id_int INTEGER,
                 format TEXT NOT NULL,
                 serialized_data BLOB NOT NULL,
                 object_repr TEXT NOT NULL,
                 status INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_versions_object ON versions(object_type, object_id);
             CREATE INDEX IF NOT EXISTS idx_versions_object_int ON versions(object_type, object_id_int);
             CREATE INDEX IF NOT EXISTS idx_versions_revision ON versions(revision_id);

             CREATE TABLE IF NOT EXISTS objects (
                 object_type TEXT NOT NULL,
                 object_id TEXT NOT NULL,
                 fields TEXT NOT NULL,
                 PRIMARY KEY (object_type, object_id)
             );",
        )?;
        Ok(())
    }

    fn load_object(conn: &Connection, object: &ObjectRef) -> Result<Option<ModelInstance>> {
        let fields: Option<String> = conn
            .query_row(
                "SELECT fields FROM objects WHERE object_type = ?1 AND object_id = ?2",
                params![object.object_type, object.object_id],
                |row| row.get(0),
            )
            .optional()?;
        fields
            .map(|json| {
                Ok(ModelInstance {
                    object_type: object.object_type.clone(),
                    pk: object.object_id.clone(),
                    fields: serde_json::from_str(&json)?,
                })
            })
            .transpose()
    }

    fn load_all(conn: &Connection) -> Result<Vec<ModelInstance>> {
        let mut stmt = conn.prepare("SELECT object_type, object_id, fields FROM objects")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(object_type, pk, json)| {
                Ok(ModelInstance {
                    object_type,
                    pk,
                    fields: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }

    fn store_object(conn: &Connection, instance: &ModelInstance) -> Result<()> {
        conn.execute(
            "INSERT INTO objects (object_type, object_id, fields) VALUES (?1, ?2, ?3)
             ON CONFLICT(object_type, object_id) DO UPDATE SET fields = excluded.fields",
            params![
                instance.object_type,
                instance.pk,
                serde_json::to_string(&instance.fields)?
            ],
        )?;
        Ok(())
    }

    fn load_revision(conn: &Connection, revision_id: RevisionId) -> Result<Option<Revision>> {
        Ok(conn
            .query_row(
                "SELECT id, manager_slug, date_created, date_updated, user_id, comment
                 FROM revisions WHERE id = ?1",
                params![revision_id],
                read_revision,
            )
            .optional()?)
    }

    fn load_version(conn: &Connection, version_id: VersionId) -> Result<Option<Version>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM versions v WHERE v.id = ?1", VERSION_COLUMNS),
                params![version_id],
                read_version,
            )
            .optional()?)
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(ReversionError::serialization(format!(
                "Timestamp out of range: {}",
                micros
            ))),
        )
    })
}

fn read_revision(row: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: row.get(0)?,
        manager_slug: row.get(1)?,
        date_created: timestamp(row, 2)?,
        date_updated: timestamp(row, 3)?,
        user_id: row.get(4)?,
        comment: row.get(5)?,
    })
}

fn read_version(row: &Row<'_>) -> rusqlite::Result<Version> {
    let status = ModerationStatus::from_code(row.get(8)?)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(8, Type::Integer, Box::new(err)))?;
    Ok(Version {
        id: row.get(0)?,
        revision_id: row.get(1)?,
        object_type: row.get(2)?,
        object_id: row.get(3)?,
        object_id_int: row.get(4)?,
        format: row.get(5)?,
        serialized_data: row.get(6)?,
        object_repr: row.get(7)?,
        status,
    })
}

impl ObjectStore for SqliteBackend {
    fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    fn get(&self, object: &ObjectRef) -> Result<Option<ModelInstance>> {
        let conn = self.conn.lock();
        Self::load_object(&conn, object)
    }

    fn list(&self, object_type: &str) -> Result<Vec<ModelInstance>> {
        let schema = self.catalog.schema(object_type)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT object_id, fields FROM objects WHERE object_type = ?1")?;
        let rows = stmt
            .query_map(params![object_type], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut objects = rows
            .into_iter()
            .map(|(pk, json)| {
                Ok(ModelInstance {
                    object_type: object_type.to_string(),
                    pk,
                    fields: serde_json::from_str(&json)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        sort_by_pk(schema, &mut objects);
        Ok(objects)
    }

    fn save(&self, instance: &ModelInstance, only: Option<&[String]>) -> Result<()> {
        let conn = self.conn.lock();
        let existing = Self::load_object(&conn, &instance.object_ref())?;
        let merged = merge_for_save(existing, instance, only);
        self.catalog.check_references(&merged, |target| {
            Ok(Self::load_object(&conn, target)?.is_some())
        })?;
        Self::store_object(&conn, &merged)?;
        tracing::debug!(object = %merged.object_ref(), "Saved object");
        Ok(())
    }

    fn update_fields(&self, object: &ObjectRef, fields: &FieldMap) -> Result<()> {
        let conn = self.conn.lock();
        let mut existing = Self::load_object(&conn, object)?
            .ok_or_else(|| ReversionError::object_not_found(object))?;
        for (name, value) in fields {
            existing.fields.insert(name.clone(), value.clone());
        }
        Self::store_object(&conn, &existing)
    }

    fn delete(&self, object: &ObjectRef) -> Result<()> {
        let conn = self.conn.lock();
        if Self::load_object(&conn, object)?.is_none() {
            return Err(ReversionError::object_not_found(object));
        }
        let all = Self::load_all(&conn)?;
        let referrers = self.catalog.protected_referrers(object, all.iter());
        if let Some(referrer) = referrers.first() {
            return Err(ReversionError::integrity_conflict(format!(
                "Cannot delete {}: referenced by {}",
                object, referrer
            )));
        }
        conn.execute(
            "DELETE FROM objects WHERE object_type = ?1 AND object_id = ?2",
            params![object.object_type, object.object_id],
        )?;
        for mut other in all {
            if other.object_ref() != *object && self.catalog.prune_memberships(&mut other, object) {
                Self::store_object(&conn, &other)?;
            }
        }
        tracing::debug!(object = %object, "Deleted object");
        Ok(())
    }
}

impl VersionRepository for SqliteBackend {
    fn insert_revision(&self, revision: &NewRevision) -> Result<Revision> {
        let conn = self.conn.lock();
        let created = revision.date_created.timestamp_micros();
        conn.execute(
            "INSERT INTO revisions (manager_slug, date_created, date_updated, user_id, comment)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                revision.manager_slug,
                created,
                created,
                revision.user_id,
                revision.comment
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::load_revision(&conn, id)?.ok_or_else(|| ReversionError::revision_not_found(id))
    }

    fn touch_revision(&self, revision_id: RevisionId, comment: Option<&str>) -> Result<Revision> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE revisions
             SET date_updated = MAX(date_created, ?2), comment = COALESCE(?3, comment)
             WHERE id = ?1",
            params![revision_id, Utc::now().timestamp_micros(), comment],
        )?;
        if changed == 0 {
            return Err(ReversionError::revision_not_found(revision_id));
        }
        Self::load_revision(&conn, revision_id)?
            .ok_or_else(|| ReversionError::revision_not_found(revision_id))
    }

    fn get_revision(&self, revision_id: RevisionId) -> Result<Option<Revision>> {
        let conn = self.conn.lock();
        Self::load_revision(&conn, revision_id)
    }

    fn insert_version(&self, version: &NewVersion) -> Result<Version> {
        let conn = self.conn.lock();
        if Self::load_revision(&conn, version.revision_id)?.is_none() {
            return Err(ReversionError::revision_not_found(version.revision_id));
        }
        conn.execute(
            "INSERT INTO versions
             (revision_id, object_type, object_id, object_id_int, format,
              serialized_data, object_repr, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version.revision_id,
                version.object_type,
                version.object_id,
                version.object_id_int,
                version.format,
                version.serialized_data,
                version.object_repr,
                version.status.code(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::load_version(&conn, id)?.ok_or_else(|| ReversionError::version_not_found(id))
    }

    fn get_version(&self, version_id: VersionId) -> Result<Option<Version>> {
        let conn = self.conn.lock();
        Self::load_version(&conn, version_id)
    }

    fn update_version_status(&self, version_id: VersionId, status: ModerationStatus) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE versions SET status = ?2 WHERE id = ?1",
            params![version_id, status.code()],
        )?;
        if changed == 0 {
            return Err(ReversionError::version_not_found(version_id));
        }
        Ok(())
    }

    fn delete_version(&self, version_id: VersionId) -> Result<()> {
        let conn = self.conn.lock();
        let version = Self::load_version(&conn, version_id)?
            .ok_or_else(|| ReversionError::version_not_found(version_id))?;
        conn.execute("DELETE FROM versions WHERE id = ?1", params![version_id])?;
        conn.execute(
            "DELETE FROM revisions WHERE id = ?1
             AND NOT EXISTS (SELECT 1 FROM versions WHERE revision_id = ?1)",
            params![version.revision_id],
        )?;
        Ok(())
    }

    fn versions_for_revision(&self, revision_id: RevisionId) -> Result<Vec<Version>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM versions v WHERE v.revision_id = ?1 ORDER BY v.id",
            VERSION_COLUMNS
        ))?;
        let versions = stmt
            .query_map(params![revision_id], read_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn query_versions(&self, query: &VersionQuery) -> Result<Vec<Version>> {
        let direction = match query.order {
            HistoryOrder::Ascending => "ASC",
            HistoryOrder::Descending => "DESC",
        };
        let sql = format!(
            "SELECT {columns}
             FROM versions v JOIN revisions r ON r.id = v.revision_id
             WHERE v.object_type = ?1
               AND (?2 IS NULL OR v.object_id = ?2)
               AND (?3 IS NULL OR r.manager_slug = ?3)
             ORDER BY r.date_created {dir}, r.date_updated {dir}, v.id {dir}",
            columns = VERSION_COLUMNS,
            dir = direction
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map(
                params![query.object_type, query.object_id, query.manager_slug],
                read_version,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(match &query.statuses {
            Some(statuses) => versions
                .into_iter()
                .filter(|v| statuses.contains(&v.status))
                .collect(),
            None => versions,
        })
    }
}

impl Transactional for SqliteBackend {
    fn supports_savepoints(&self) -> bool {
        true
    }

    fn begin(&self) -> Result<SavepointId> {
        let id = self.next_savepoint.fetch_add(1, Ordering::SeqCst);
        self.scopes.enter(id, || {
            self.conn
                .lock()
                .execute_batch(&format!("SAVEPOINT sp_{}", id))
                .map_err(|e| {
                    ReversionError::transaction(format!("SAVEPOINT failed: {}", e)).with_source(e)
                })
        })?;
        Ok(id)
    }

    fn commit(&self, savepoint: SavepointId) -> Result<()> {
        self.scopes.release(savepoint, || {
            self.conn
                .lock()
                .execute_batch(&format!("RELEASE SAVEPOINT sp_{}", savepoint))
                .map_err(|e| {
                    ReversionError::transaction(format!("RELEASE failed: {}", e)).with_source(e)
                })
        })
    }

    fn rollback(&self, savepoint: SavepointId) -> Result<()> {
        self.scopes.release(savepoint, || {
            self.conn
                .lock()
                .execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT sp_{id}; RELEASE SAVEPOINT sp_{id}",
                    id = savepoint
                ))
                .map_err(|e| {
                    ReversionError::transaction(format!("ROLLBACK TO failed: {}", e)).with_source(e)
                })
        })
    }
}
