// 上传模块
//
// - 分片规划：按最大分片大小切分文件并预分配远端 ID
// - ID 分配：分批请求、不足时补齐
// - 上传引擎：通过传输池并发上传分片，单个分片失败互不影响

pub mod chunk;
pub mod engine;
pub mod id_allocator;

pub use chunk::{plan_ranges, ChunkPlanner, DEFAULT_CHUNK_STREAM_SIZE, DEFAULT_MAX_CHUNK_SIZE};
pub use engine::{UploadEngine, UploadResult, UploadSettings};
pub use id_allocator::{AllocationError, IdAllocator};
