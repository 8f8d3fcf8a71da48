//! SQLite 目录数据库
//!
//! - users: 用户
//! - directories: 目录树（同一用户、同一父目录下名称唯一）
//! - files: 文件记录
//! - file_chunks: 文件分片清单

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{CatalogError, Directory, FileManifest, FileRecord, ManifestChunk};
use super::Catalog;

/// SQLite 目录数据库
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// 打开（或创建）数据库文件
    pub fn open(db_path: &Path) -> Result<Self, CatalogError> {
        // 确保父目录存在
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        info!("打开目录数据库: {:?}", db_path);
        Self::with_connection(conn)
    }

    /// 内存数据库
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CatalogError> {
        let catalog = Self {
            conn: Mutex::new(conn),
        };
        catalog.init_tables()?;
        Ok(catalog)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn.lock().map_err(|_| CatalogError::Lock)
    }

    /// 初始化数据库表
    fn init_tables(&self) -> Result<(), CatalogError> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS directories (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT,
                owner TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- 顶层目录的 parent_id 为 NULL，用 IFNULL 让唯一约束同样生效
            CREATE UNIQUE INDEX IF NOT EXISTS idx_directories_unique_name
                ON directories(owner, IFNULL(parent_id, ''), name);

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                parent_id TEXT,
                owner TEXT NOT NULL,
                content_hash TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner, created_at);

            CREATE TABLE IF NOT EXISTS file_chunks (
                file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                chunk_id TEXT NOT NULL,
                remote_id TEXT,
                size INTEGER NOT NULL,
                PRIMARY KEY (file_id, chunk_index)
            );
            "#,
        )?;

        debug!("目录数据库表初始化完成");
        Ok(())
    }

    fn chunks_of(conn: &Connection, file_id: &str) -> Result<Vec<ManifestChunk>, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT chunk_index, chunk_id, remote_id, size FROM file_chunks
             WHERE file_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let chunks = stmt
            .query_map(params![file_id], |row| {
                Ok(ManifestChunk {
                    index: row.get::<_, i64>(0)? as usize,
                    id: row.get(1)?,
                    remote_id: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }
}

/// 唯一约束冲突转换为 Duplicate
fn map_insert_error(err: rusqlite::Error, what: impl Into<String>) -> CatalogError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            CatalogError::Duplicate(what.into())
        }
        _ => CatalogError::Sqlite(err),
    }
}

impl Catalog for SqliteCatalog {
    fn upsert_user(&self, username: &str) -> Result<(), CatalogError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO users (username, created_at) VALUES (?1, ?2)",
            params![username, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn create_directory(
        &self,
        name: &str,
        owner: &str,
        parent_id: Option<&str>,
    ) -> Result<String, CatalogError> {
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO directories (id, name, parent_id, owner, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, parent_id, owner, Utc::now().timestamp()],
        )
        .map_err(|e| map_insert_error(e, name))?;

        info!("创建目录: name={}, owner={}, id={}", name, owner, id);
        Ok(id)
    }

    fn directory_exists(
        &self,
        name: &str,
        parent_id: Option<&str>,
        owner: &str,
    ) -> Result<bool, CatalogError> {
        let conn = self.lock()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM directories
                 WHERE owner = ?1 AND name = ?2 AND IFNULL(parent_id, '') = IFNULL(?3, '')",
                params![owner, name, parent_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_directories(&self, owner: &str) -> Result<Vec<Directory>, CatalogError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, parent_id, owner FROM directories
             WHERE owner = ?1 ORDER BY created_at ASC, name ASC",
        )?;
        let directories = stmt
            .query_map(params![owner], |row| {
                Ok(Directory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                    owner: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(directories)
    }

    fn create_file(&self, manifest: &FileManifest) -> Result<FileRecord, CatalogError> {
        manifest.validate()?;

        let created_at = Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO files (id, name, size, parent_id, owner, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                manifest.id,
                manifest.name,
                manifest.size as i64,
                manifest.parent_id,
                manifest.owner,
                manifest.content_hash,
                created_at
            ],
        )
        .map_err(|e| map_insert_error(e, manifest.id.clone()))?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO file_chunks (file_id, chunk_index, chunk_id, remote_id, size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for chunk in &manifest.chunks {
                stmt.execute(params![
                    manifest.id,
                    chunk.index as i64,
                    chunk.id,
                    chunk.remote_id,
                    chunk.size as i64
                ])?;
            }
        }

        tx.commit()?;
        info!(
            "写入文件清单: id={}, name={}, 分片数量={}",
            manifest.id,
            manifest.name,
            manifest.chunks.len()
        );

        Ok(FileRecord {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            size: manifest.size,
            parent_id: manifest.parent_id.clone(),
            owner: manifest.owner.clone(),
            content_hash: manifest.content_hash.clone(),
            chunk_count: manifest.chunks.len(),
            created_at,
        })
    }

    fn get_file(&self, id: &str, owner: &str) -> Result<Option<FileManifest>, CatalogError> {
        let conn = self.lock()?;
        let file = conn
            .query_row(
                "SELECT id, name, size, parent_id, owner, content_hash FROM files
                 WHERE id = ?1 AND owner = ?2",
                params![id, owner],
                |row| {
                    Ok(FileManifest {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        size: row.get::<_, i64>(2)? as u64,
                        parent_id: row.get(3)?,
                        owner: row.get(4)?,
                        content_hash: row.get(5)?,
                        chunks: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut file) = file else {
            return Ok(None);
        };
        file.chunks = Self::chunks_of(&conn, &file.id)?;
        Ok(Some(file))
    }

    fn list_files(&self, owner: &str) -> Result<Vec<FileRecord>, CatalogError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.name, f.size, f.parent_id, f.owner, f.content_hash, f.created_at,
                    (SELECT COUNT(*) FROM file_chunks c WHERE c.file_id = f.id)
             FROM files f WHERE f.owner = ?1 ORDER BY f.created_at ASC, f.name ASC",
        )?;
        let files = stmt
            .query_map(params![owner], |row| {
                Ok(FileRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    parent_id: row.get(3)?,
                    owner: row.get(4)?,
                    content_hash: row.get(5)?,
                    created_at: row.get(6)?,
                    chunk_count: row.get::<_, i64>(7)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, owner: &str) -> FileManifest {
        FileManifest {
            id: id.to_string(),
            name: "lecture.mp4".to_string(),
            size: 2500,
            parent_id: None,
            owner: owner.to_string(),
            content_hash: Some("abc".to_string()),
            chunks: vec![
                ManifestChunk {
                    index: 0,
                    id: "c0".into(),
                    remote_id: Some("c0".into()),
                    size: 1000,
                },
                ManifestChunk {
                    index: 1,
                    id: "c1".into(),
                    remote_id: None,
                    size: 1000,
                },
                ManifestChunk {
                    index: 2,
                    id: "c2".into(),
                    remote_id: Some("c2".into()),
                    size: 500,
                },
            ],
        }
    }

    #[test]
    fn test_directory_uniqueness_per_parent() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        catalog.upsert_user("alice").unwrap();
        catalog.upsert_user("alice").unwrap();

        let top = catalog.create_directory("courses", "alice", None).unwrap();
        assert!(catalog.directory_exists("courses", None, "alice").unwrap());
        assert!(!catalog.directory_exists("courses", None, "bob").unwrap());
        assert!(!catalog.directory_exists("courses", Some(&top), "alice").unwrap());

        // 顶层同名冲突
        let dup = catalog.create_directory("courses", "alice", None);
        assert!(matches!(dup, Err(CatalogError::Duplicate(_))));

        // 不同父目录或不同用户可以同名
        catalog.create_directory("courses", "alice", Some(&top)).unwrap();
        catalog.create_directory("courses", "bob", None).unwrap();

        assert_eq!(catalog.list_directories("alice").unwrap().len(), 2);
    }

    #[test]
    fn test_file_round_trip_keeps_chunk_order() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let record = catalog.create_file(&manifest("f1", "alice")).unwrap();
        assert_eq!(record.chunk_count, 3);

        let loaded = catalog.get_file("f1", "alice").unwrap().unwrap();
        assert_eq!(loaded, manifest("f1", "alice"));
        assert!(!loaded.is_complete());

        // 其他用户看不到
        assert!(catalog.get_file("f1", "bob").unwrap().is_none());

        let files = catalog.list_files("alice").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].chunk_count, 3);
    }

    #[test]
    fn test_invalid_manifest_is_rejected() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let mut bad = manifest("f1", "alice");
        bad.size = 3000;
        assert!(matches!(
            catalog.create_file(&bad),
            Err(CatalogError::InvalidManifest(_))
        ));
        assert!(catalog.get_file("f1", "alice").unwrap().is_none());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        {
            let catalog = SqliteCatalog::open(&path).unwrap();
            catalog.create_file(&manifest("f1", "alice")).unwrap();
        }
        let catalog = SqliteCatalog::open(&path).unwrap();
        assert!(catalog.get_file("f1", "alice").unwrap().is_some());
    }
}
