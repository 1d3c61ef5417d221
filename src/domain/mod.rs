// ==========================================
// 种羊选配决策支持系统 - 领域层
// ==========================================
// 职责: 实体与类型定义,不含业务规则
// ==========================================

pub mod animal;
pub mod genetics;
pub mod mating;
pub mod types;

// 重导出领域实体
pub use animal::{Animal, PhenotypeRecord};
pub use genetics::GeneticMeritEstimate;
pub use mating::{
    CoverageRequest, Recommendation, SimulationParameters, SimulationSession,
};
pub use types::{RecommendationStatus, SelectionMethod, Sex};
