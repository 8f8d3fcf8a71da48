// 本地目录数据库
//
// 记录用户、目录树以及文件的分片清单，下载时无需再查询远端元数据

pub mod paths;
pub mod sqlite;
pub mod types;

pub use paths::{resolve_directory_paths, DirectoryIndex, DirectoryPath};
pub use sqlite::SqliteCatalog;
pub use types::{
    CatalogError, CyclicDirectoryError, Directory, FileManifest, FileRecord, ManifestChunk,
};

/// 传输核心依赖的目录数据库操作
///
/// 同一用户下，同一父目录中的目录名唯一；`get_file` 返回的分片按 index 升序
pub trait Catalog: Send + Sync {
    fn upsert_user(&self, username: &str) -> Result<(), CatalogError>;

    /// 创建目录，返回新目录 ID
    fn create_directory(
        &self,
        name: &str,
        owner: &str,
        parent_id: Option<&str>,
    ) -> Result<String, CatalogError>;

    fn directory_exists(
        &self,
        name: &str,
        parent_id: Option<&str>,
        owner: &str,
    ) -> Result<bool, CatalogError>;

    fn list_directories(&self, owner: &str) -> Result<Vec<Directory>, CatalogError>;

    /// 写入文件及其分片清单
    fn create_file(&self, manifest: &FileManifest) -> Result<FileRecord, CatalogError>;

    fn get_file(&self, id: &str, owner: &str) -> Result<Option<FileManifest>, CatalogError>;

    fn list_files(&self, owner: &str) -> Result<Vec<FileRecord>, CatalogError>;
}
