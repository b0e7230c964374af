//! ID 生成

use uuid::Uuid;

/// 总线 ID 默认宽度（二进制编码中为定长字段）
pub const DEFAULT_BUS_ID_WIDTH: usize = 24;

/// 生成新的 UUID v7（时间有序），用作操作关联 ID
pub fn new_id() -> Uuid {
    Uuid::now_v7()
}

/// 生成定长的总线实例 ID
///
/// 由 UUID v4 的十六进制形式截取而来，宽度上限为 32
pub fn new_bus_id(width: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(width.min(id.len()));
    id
}
