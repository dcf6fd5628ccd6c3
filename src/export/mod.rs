/// 结果导出 (Result Export)
///
/// 把持久化的预测结果展开为每个视频一张 CSV 表
pub mod flatten;

pub use flatten::{FlatRow, FlatSchema, FlatTable, ResultFlattener};
