// ==========================================
// 种羊选配决策支持系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 数据质量错误 =====
    /// 系谱中检测到环（亲子链回到自身）
    #[error("系谱环检测: animal_id={animal_id} 在当前祖先链上重复出现")]
    PedigreeCycle { animal_id: i64 },

    // ===== 参数错误 =====
    #[error("引擎参数无效: {0}")]
    InvalidParameter(String),
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
