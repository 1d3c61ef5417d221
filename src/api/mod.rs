// ==========================================
// 种羊选配决策支持系统 - API 层
// ==========================================

pub mod error;
pub mod mating_api;
pub mod validator;

pub use error::{ApiError, ApiResult};
pub use mating_api::{
    BatchCoverageItemError, BatchCoverageResponse, EligibleAnimalInfo, EligibleAnimalsResponse,
    GeneticEvaluationEntry, GeneticEvaluationResponse, MatingApi, RecommendationInfo,
    RecommendationListResponse, RecommendationStatusResponse, SimulateMatingResponse,
    DEFAULT_HERITABILITY, DEFAULT_WEIGHT_ADJUSTMENT_DAYS,
};
pub use validator::{validate_evaluation_inputs, validate_simulation_parameters};
