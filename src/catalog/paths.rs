// 绝对路径解析
//
// 沿 parent_id 向上迭代到顶层目录，拼成以 / 开头的 POSIX 路径。
// 父目录不在集合中时视为顶层；遇到重复访问的目录返回 CyclicDirectoryError

use crate::catalog::types::{CyclicDirectoryError, Directory};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// 带绝对路径的目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryPath {
    pub id: String,
    pub name: String,
    pub absolute_path: String,
}

/// 目录索引（按 ID）
pub struct DirectoryIndex<'a> {
    by_id: HashMap<&'a str, &'a Directory>,
}

impl<'a> DirectoryIndex<'a> {
    pub fn new(directories: &'a [Directory]) -> Self {
        Self {
            by_id: directories.iter().map(|d| (d.id.as_str(), d)).collect(),
        }
    }

    /// 解析目录的绝对路径
    pub fn absolute_path(&self, directory_id: &str) -> Result<String, CyclicDirectoryError> {
        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.by_id.get(directory_id).copied();

        while let Some(directory) = current {
            if !visited.insert(directory.id.as_str()) {
                return Err(CyclicDirectoryError {
                    start: directory_id.to_string(),
                    repeated: directory.id.clone(),
                });
            }
            segments.push(directory.name.as_str());
            current = directory
                .parent_id
                .as_deref()
                .and_then(|parent| self.by_id.get(parent).copied());
        }

        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// 文件的绝对路径：所在目录路径 + 文件名；没有目录时为 /name
    pub fn file_path(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<String, CyclicDirectoryError> {
        match parent_id {
            Some(parent) if self.by_id.contains_key(parent) => {
                let dir = self.absolute_path(parent)?;
                Ok(format!("{}/{}", dir.trim_end_matches('/'), name))
            }
            _ => Ok(format!("/{}", name)),
        }
    }
}

/// 计算所有目录的绝对路径（按路径排序）
pub fn resolve_directory_paths(
    directories: &[Directory],
) -> Result<Vec<DirectoryPath>, CyclicDirectoryError> {
    let index = DirectoryIndex::new(directories);
    let mut paths = directories
        .iter()
        .map(|d| {
            Ok(DirectoryPath {
                id: d.id.clone(),
                name: d.name.clone(),
                absolute_path: index.absolute_path(&d.id)?,
            })
        })
        .collect::<Result<Vec<_>, CyclicDirectoryError>>()?;

    paths.sort_by(|a, b| a.absolute_path.cmp(&b.absolute_path));
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(id: &str, name: &str, parent: Option<&str>) -> Directory {
        Directory {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent.map(str::to_string),
            owner: "alice".to_string(),
        }
    }

    #[test]
    fn test_nested_paths() {
        let dirs = vec![
            dir("1", "courses", None),
            dir("2", "rust", Some("1")),
            dir("3", "week_1", Some("2")),
            dir("4", "misc", None),
        ];

        let paths = resolve_directory_paths(&dirs).unwrap();
        let by_id: HashMap<_, _> = paths
            .iter()
            .map(|p| (p.id.as_str(), p.absolute_path.as_str()))
            .collect();

        assert_eq!(by_id["1"], "/courses");
        assert_eq!(by_id["2"], "/courses/rust");
        assert_eq!(by_id["3"], "/courses/rust/week_1");
        assert_eq!(by_id["4"], "/misc");
        assert_eq!(paths[0].absolute_path, "/courses");
    }

    #[test]
    fn test_missing_parent_is_top_level() {
        let dirs = vec![dir("2", "orphan", Some("gone"))];
        let index = DirectoryIndex::new(&dirs);
        assert_eq!(index.absolute_path("2").unwrap(), "/orphan");
    }

    #[test]
    fn test_cycle_is_reported() {
        let dirs = vec![dir("a", "a", Some("b")), dir("b", "b", Some("a"))];
        let err = resolve_directory_paths(&dirs).unwrap_err();
        assert_eq!(err.start, "a");
        assert_eq!(err.repeated, "a");
    }

    #[test]
    fn test_file_paths() {
        let dirs = vec![dir("1", "courses", None)];
        let index = DirectoryIndex::new(&dirs);
        assert_eq!(index.file_path(Some("1"), "a.mp4").unwrap(), "/courses/a.mp4");
        assert_eq!(index.file_path(None, "a.mp4").unwrap(), "/a.mp4");
        assert_eq!(index.file_path(Some("unknown"), "a.mp4").unwrap(), "/a.mp4");
    }
}
