//! Media repository trait and SQLite implementation
//!
//! Entities of every kind share one table. The serialized entity lives in the
//! `body` column; client mappings and external identifiers are projected into
//! index tables so the matcher can resolve remote records without decoding
//! bodies.

use crate::error::{LibraryError, Result};
use crate::models::{ClientId, ExternalId, ExternalIds, MediaId, MediaKind, SyncClients};
use async_trait::async_trait;
use sqlx::{query, query_as, QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::debug;

/// Storage form of a media entity
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub id: Option<MediaId>,
    pub kind: MediaKind,
    pub title: String,
    pub normalized_title: String,
    pub release_year: Option<i32>,
    /// Version the record was read at; `update` requires it to still match
    pub version: i64,
    /// Serialized entity
    pub body: String,
    pub sync_clients: SyncClients,
    pub external_ids: ExternalIds,
}

/// Media repository interface for data access operations
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Find a record by its local ID
    async fn find_by_id(&self, id: MediaId) -> Result<Option<MediaRecord>>;

    /// Find the entity of `kind` mapped to `remote_item_id` on `client_id`
    async fn find_by_remote_id(
        &self,
        kind: MediaKind,
        client_id: ClientId,
        remote_item_id: &str,
    ) -> Result<Option<MediaId>>;

    /// Find the lowest-ID entity of `kind` sharing at least one of `ids`
    ///
    /// Entities already mapped on `unmapped_on` are never returned.
    async fn find_by_external_ids(
        &self,
        kind: MediaKind,
        ids: &[ExternalId],
        unmapped_on: ClientId,
    ) -> Result<Option<MediaId>>;

    /// Find entities of `kind` with the given normalized title and year that
    /// are mapped on at least one of `clients` but not on `unmapped_on`,
    /// ordered by ID
    async fn find_by_title_year(
        &self,
        kind: MediaKind,
        normalized_title: &str,
        year: i32,
        clients: &[ClientId],
        unmapped_on: ClientId,
    ) -> Result<Vec<MediaId>>;

    /// Insert a new record and return its assigned ID
    ///
    /// # Errors
    /// Returns `InvalidInput` if the record already carries an ID.
    async fn insert(&self, record: &MediaRecord) -> Result<MediaId>;

    /// Replace a record if its stored version still equals `record.version`
    ///
    /// # Returns
    /// The new version number
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `VersionConflict` if it was modified since it was read
    async fn update(&self, record: &MediaRecord) -> Result<i64>;

    /// Translate a remote item ID from one client to another through the
    /// local entity of one of `kinds` mapped on both
    async fn translate_remote_id(
        &self,
        from_client: ClientId,
        remote_item_id: &str,
        to_client: ClientId,
        kinds: &[MediaKind],
    ) -> Result<Option<String>>;

    /// Count stored entities of a kind
    async fn count_by_kind(&self, kind: MediaKind) -> Result<i64>;
}

/// SQLite implementation of MediaRepository
pub struct SqliteMediaRepository {
    pool: SqlitePool,
}

impl SqliteMediaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Drop candidates `client_id` already maps under some other remote ID
    fn push_unmapped_on(builder: &mut QueryBuilder<'_, Sqlite>, client_id: ClientId) {
        builder.push(
            " AND NOT EXISTS (SELECT 1 FROM media_sync_clients x \
             WHERE x.media_id = m.id AND x.client_id = ",
        );
        builder.push_bind(client_id);
        builder.push(")");
    }

    async fn write_projections(
        tx: &mut Transaction<'_, Sqlite>,
        id: MediaId,
        record: &MediaRecord,
    ) -> Result<()> {
        query("DELETE FROM media_sync_clients WHERE media_id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        query("DELETE FROM media_external_ids WHERE media_id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        for mapping in record.sync_clients.iter() {
            query(
                r#"
                INSERT INTO media_sync_clients
                    (media_id, client_id, client_kind, kind, remote_item_id, status)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(mapping.client_id)
            .bind(mapping.client_kind.as_str())
            .bind(record.kind.as_str())
            .bind(&mapping.remote_item_id)
            .bind(mapping.status.as_str())
            .execute(&mut **tx)
            .await?;
        }

        for external in record.external_ids.iter() {
            query("INSERT INTO media_external_ids (media_id, source, value) VALUES (?, ?, ?)")
                .bind(id)
                .bind(external.source.as_str())
                .bind(&external.value)
                .execute(&mut **tx)
                .await?;
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MediaRow {
    id: i64,
    kind: String,
    title: String,
    normalized_title: String,
    release_year: Option<i32>,
    version: i64,
    body: String,
}

#[async_trait]
impl MediaRepository for SqliteMediaRepository {
    async fn find_by_id(&self, id: MediaId) -> Result<Option<MediaRecord>> {
        let row = query_as::<_, MediaRow>(
            r#"
            SELECT id, kind, title, normalized_title, release_year, version, body
            FROM media_items WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind = row
            .kind
            .parse::<MediaKind>()
            .map_err(|message| LibraryError::InvalidInput {
                field: "kind".to_string(),
                message,
            })?;

        // Mappings are carried by the body; the index tables are derived from it.
        #[derive(serde::Deserialize)]
        struct Mappings {
            #[serde(default)]
            sync_clients: SyncClients,
            #[serde(default)]
            external_ids: ExternalIds,
        }
        let mappings: Mappings = serde_json::from_str(&row.body)?;

        Ok(Some(MediaRecord {
            id: Some(MediaId(row.id)),
            kind,
            title: row.title,
            normalized_title: row.normalized_title,
            release_year: row.release_year,
            version: row.version,
            body: row.body,
            sync_clients: mappings.sync_clients,
            external_ids: mappings.external_ids,
        }))
    }

    async fn find_by_remote_id(
        &self,
        kind: MediaKind,
        client_id: ClientId,
        remote_item_id: &str,
    ) -> Result<Option<MediaId>> {
        let row: Option<(i64,)> = query_as(
            r#"
            SELECT media_id FROM media_sync_clients
            WHERE kind = ? AND client_id = ? AND remote_item_id = ?
            ORDER BY media_id ASC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(client_id)
        .bind(remote_item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| MediaId(id)))
    }

    async fn find_by_external_ids(
        &self,
        kind: MediaKind,
        ids: &[ExternalId],
        unmapped_on: ClientId,
    ) -> Result<Option<MediaId>> {
        if ids.is_empty() {
            return Ok(None);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT e.media_id FROM media_external_ids e \
             JOIN media_items m ON m.id = e.media_id \
             WHERE m.kind = ",
        );
        builder.push_bind(kind.as_str());
        builder.push(" AND (");
        let mut separated = builder.separated(" OR ");
        for id in ids {
            separated.push("(e.source = ");
            separated.push_bind_unseparated(id.source.as_str());
            separated.push_unseparated(" AND e.value = ");
            separated.push_bind_unseparated(id.value.clone());
            separated.push_unseparated(")");
        }
        builder.push(")");
        Self::push_unmapped_on(&mut builder, unmapped_on);
        builder.push(" ORDER BY e.media_id ASC LIMIT 1");

        let row: Option<(i64,)> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| MediaId(id)))
    }

    async fn find_by_title_year(
        &self,
        kind: MediaKind,
        normalized_title: &str,
        year: i32,
        clients: &[ClientId],
        unmapped_on: ClientId,
    ) -> Result<Vec<MediaId>> {
        if clients.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT m.id FROM media_items m \
             JOIN media_sync_clients c ON c.media_id = m.id \
             WHERE m.kind = ",
        );
        builder.push_bind(kind.as_str());
        builder.push(" AND m.normalized_title = ");
        builder.push_bind(normalized_title.to_string());
        builder.push(" AND m.release_year = ");
        builder.push_bind(year);
        builder.push(" AND c.client_id IN (");
        let mut separated = builder.separated(", ");
        for client in clients {
            separated.push_bind(*client);
        }
        separated.push_unseparated(")");
        Self::push_unmapped_on(&mut builder, unmapped_on);
        builder.push(" ORDER BY m.id ASC");

        let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|(id,)| MediaId(id)).collect())
    }

    async fn insert(&self, record: &MediaRecord) -> Result<MediaId> {
        if record.id.is_some() {
            return Err(LibraryError::InvalidInput {
                field: "id".to_string(),
                message: "New records must not carry an ID".to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let result = query(
            r#"
            INSERT INTO media_items
                (kind, title, normalized_title, release_year, version, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.title)
        .bind(&record.normalized_title)
        .bind(record.release_year)
        .bind(&record.body)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let id = MediaId(result.last_insert_rowid());
        Self::write_projections(&mut tx, id, record).await?;
        tx.commit().await?;

        debug!(media_id = %id, kind = %record.kind, "Inserted media record");
        Ok(id)
    }

    async fn update(&self, record: &MediaRecord) -> Result<i64> {
        let id = record.id.ok_or_else(|| LibraryError::InvalidInput {
            field: "id".to_string(),
            message: "Cannot update a record without an ID".to_string(),
        })?;

        let mut tx = self.pool.begin().await?;

        let result = query(
            r#"
            UPDATE media_items
            SET title = ?, normalized_title = ?, release_year = ?, body = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&record.title)
        .bind(&record.normalized_title)
        .bind(record.release_year)
        .bind(&record.body)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .bind(record.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> = query_as("SELECT version FROM media_items WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return Err(match exists {
                Some(_) => LibraryError::VersionConflict {
                    id: id.0,
                    expected: record.version,
                },
                None => LibraryError::NotFound {
                    entity_type: "MediaItem".to_string(),
                    id: id.to_string(),
                },
            });
        }

        Self::write_projections(&mut tx, id, record).await?;
        tx.commit().await?;

        debug!(media_id = %id, version = record.version + 1, "Updated media record");
        Ok(record.version + 1)
    }

    async fn translate_remote_id(
        &self,
        from_client: ClientId,
        remote_item_id: &str,
        to_client: ClientId,
        kinds: &[MediaKind],
    ) -> Result<Option<String>> {
        if kinds.is_empty() {
            return Ok(None);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT target.remote_item_id \
             FROM media_sync_clients source \
             JOIN media_sync_clients target ON target.media_id = source.media_id \
             JOIN media_items m ON m.id = source.media_id \
             WHERE source.client_id = ",
        );
        builder.push_bind(from_client);
        builder.push(" AND source.remote_item_id = ");
        builder.push_bind(remote_item_id.to_string());
        builder.push(" AND target.client_id = ");
        builder.push_bind(to_client);
        builder.push(" AND m.kind IN (");
        let mut separated = builder.separated(", ");
        for kind in kinds {
            separated.push_bind(kind.as_str());
        }
        separated.push_unseparated(") ORDER BY source.media_id ASC LIMIT 1");

        let row: Option<(String,)> = builder
            .build_query_as()
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(remote,)| remote))
    }

    async fn count_by_kind(&self, kind: MediaKind) -> Result<i64> {
        let count: i64 = query_as("SELECT COUNT(*) FROM media_items WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{ClientKind, ExternalSource, SyncClient};

    fn record(kind: MediaKind, title: &str, year: i32, client: i64, remote: &str) -> MediaRecord {
        let mut sync_clients = SyncClients::new();
        sync_clients.upsert(SyncClient::new(ClientId(client), ClientKind::Plex, remote));
        MediaRecord {
            id: None,
            kind,
            title: title.to_string(),
            normalized_title: crate::models::normalize_title(title),
            release_year: Some(year),
            version: 0,
            body: "{}".to_string(),
            sync_clients,
            external_ids: ExternalIds::new(),
        }
    }

    async fn setup() -> SqliteMediaRepository {
        SqliteMediaRepository::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find_by_remote_id() {
        let repo = setup().await;
        let id = repo
            .insert(&record(MediaKind::Movie, "Dune", 2021, 1, "m-1"))
            .await
            .unwrap();

        let found = repo
            .find_by_remote_id(MediaKind::Movie, ClientId(1), "m-1")
            .await
            .unwrap();
        assert_eq!(found, Some(id));

        let other_kind = repo
            .find_by_remote_id(MediaKind::Series, ClientId(1), "m-1")
            .await
            .unwrap();
        assert_eq!(other_kind, None);
    }

    #[tokio::test]
    async fn test_find_by_external_ids_returns_lowest_id() {
        let repo = setup().await;
        let mut first = record(MediaKind::Movie, "Dune", 2021, 1, "a");
        first
            .external_ids
            .insert(ExternalId::new(ExternalSource::Tmdb, "438631"));
        let mut second = record(MediaKind::Movie, "Dune", 2021, 2, "b");
        second
            .external_ids
            .insert(ExternalId::new(ExternalSource::Imdb, "tt1160419"));

        let first_id = repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();

        let found = repo
            .find_by_external_ids(
                MediaKind::Movie,
                &[
                    ExternalId::new(ExternalSource::Imdb, "tt1160419"),
                    ExternalId::new(ExternalSource::Tmdb, "438631"),
                ],
                ClientId(3),
            )
            .await
            .unwrap();
        assert_eq!(found, Some(first_id));
    }

    #[tokio::test]
    async fn test_find_by_title_year_scoped_to_clients() {
        let repo = setup().await;
        let mine = repo
            .insert(&record(MediaKind::Movie, "Dune", 2021, 1, "a"))
            .await
            .unwrap();
        repo.insert(&record(MediaKind::Movie, "Dune", 2021, 9, "z"))
            .await
            .unwrap();

        let found = repo
            .find_by_title_year(MediaKind::Movie, "dune", 2021, &[ClientId(1), ClientId(2)], ClientId(2))
            .await
            .unwrap();
        assert_eq!(found, vec![mine]);

        let none = repo
            .find_by_title_year(MediaKind::Movie, "dune", 2021, &[], ClientId(2))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_update_detects_version_conflict() {
        let repo = setup().await;
        let mut rec = record(MediaKind::Movie, "Dune", 2021, 1, "a");
        let id = repo.insert(&rec).await.unwrap();
        rec.id = Some(id);
        rec.version = 1;

        let new_version = repo.update(&rec).await.unwrap();
        assert_eq!(new_version, 2);

        let stale = repo.update(&rec).await;
        assert!(matches!(stale, Err(LibraryError::VersionConflict { .. })));

        rec.id = Some(MediaId(999));
        let missing = repo.update(&rec).await;
        assert!(matches!(missing, Err(LibraryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_rewrites_mappings() {
        let repo = setup().await;
        let mut rec = record(MediaKind::Track, "Song", 1999, 1, "t-1");
        let id = repo.insert(&rec).await.unwrap();
        rec.id = Some(id);
        rec.version = 1;
        rec.sync_clients
            .upsert(SyncClient::new(ClientId(2), ClientKind::Subsonic, "s-7"));
        repo.update(&rec).await.unwrap();

        let translated = repo
            .translate_remote_id(ClientId(1), "t-1", ClientId(2), &MediaKind::CATALOG)
            .await
            .unwrap();
        assert_eq!(translated.as_deref(), Some("s-7"));

        let untranslated = repo
            .translate_remote_id(ClientId(1), "t-1", ClientId(3), &MediaKind::CATALOG)
            .await
            .unwrap();
        assert_eq!(untranslated, None);
        assert_eq!(repo.count_by_kind(MediaKind::Track).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookups_skip_entities_already_mapped_on_client() {
        let repo = setup().await;
        let mut taken = record(MediaKind::Movie, "Solaris", 2002, 1, "m1");
        taken
            .external_ids
            .insert(ExternalId::new(ExternalSource::Tmdb, "2103"));
        let taken = repo.insert(&taken).await.unwrap();
        let mut free = record(MediaKind::Movie, "Solaris", 2002, 2, "e1");
        free.external_ids
            .insert(ExternalId::new(ExternalSource::Tmdb, "2103"));
        let free = repo.insert(&free).await.unwrap();

        let by_title = repo
            .find_by_title_year(MediaKind::Movie, "solaris", 2002, &[ClientId(1), ClientId(2)], ClientId(1))
            .await
            .unwrap();
        assert_eq!(by_title, vec![free]);

        let by_external = repo
            .find_by_external_ids(
                MediaKind::Movie,
                &[ExternalId::new(ExternalSource::Tmdb, "2103")],
                ClientId(1),
            )
            .await
            .unwrap();
        assert_eq!(by_external, Some(free));

        let from_elsewhere = repo
            .find_by_external_ids(
                MediaKind::Movie,
                &[ExternalId::new(ExternalSource::Tmdb, "2103")],
                ClientId(3),
            )
            .await
            .unwrap();
        assert_eq!(from_elsewhere, Some(taken));
    }

    #[tokio::test]
    async fn test_translate_remote_id_filters_kinds() {
        let repo = setup().await;
        let mut track = record(MediaKind::Track, "Song", 1999, 1, "42");
        track
            .sync_clients
            .upsert(SyncClient::new(ClientId(2), ClientKind::Subsonic, "s-track"));
        repo.insert(&track).await.unwrap();
        let mut album = record(MediaKind::Album, "Record", 1999, 1, "42");
        album
            .sync_clients
            .upsert(SyncClient::new(ClientId(2), ClientKind::Subsonic, "s-album"));
        repo.insert(&album).await.unwrap();

        let as_album = repo
            .translate_remote_id(ClientId(1), "42", ClientId(2), &[MediaKind::Album])
            .await
            .unwrap();
        assert_eq!(as_album.as_deref(), Some("s-album"));

        let as_track = repo
            .translate_remote_id(ClientId(1), "42", ClientId(2), &[MediaKind::Track])
            .await
            .unwrap();
        assert_eq!(as_track.as_deref(), Some("s-track"));

        let no_kinds = repo
            .translate_remote_id(ClientId(1), "42", ClientId(2), &[])
            .await
            .unwrap();
        assert_eq!(no_kinds, None);
    }
}
