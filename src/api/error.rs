// ==========================================
// 种羊选配决策支持系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,转换 Repository/Engine 错误
//       为用户友好的错误消息
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将仓储层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidParameter(msg) => ApiError::ValidationError(msg),
            EngineError::PedigreeCycle { animal_id } => ApiError::BusinessRuleViolation(format!(
                "系谱数据异常: animal_id={} 处存在系谱环,请修正档案后重试",
                animal_id
            )),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
