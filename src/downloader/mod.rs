// 下载模块
//
// - 合并器：分片并发下载到临时文件，再按 index 顺序合并
// - 下载引擎：写入本地文件并校验内容哈希

pub mod engine;
pub mod reassembler;

pub use engine::{DownloadEngine, DownloadReport};
pub use reassembler::{DownloadSettings, Reassembler};
