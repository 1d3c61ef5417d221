// ==========================================
// 种羊选配决策支持系统 - 入参校验
// ==========================================
// 职责: 模拟参数的结构性校验,非法入参在进入引擎前拦截
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::mating::SimulationParameters;

/// 校验模拟参数
///
/// # 规则
/// - 遗传力 h² ∈ [0, 1]
/// - 最小月龄（公/母）> 0
/// - 体重校正目标日龄 > 0
/// - 单公覆配比例 ∈ (0, 100]
pub fn validate_simulation_parameters(params: &SimulationParameters) -> ApiResult<()> {
    if params.herd_id.trim().is_empty() {
        return Err(ApiError::ValidationError("herd_id 不能为空".to_string()));
    }
    if !params.heritability.is_finite() || !(0.0..=1.0).contains(&params.heritability) {
        return Err(ApiError::ValidationError(format!(
            "遗传力必须在 [0, 1] 范围内: {}",
            params.heritability
        )));
    }
    if params.min_age_male_months <= 0 {
        return Err(ApiError::ValidationError(format!(
            "公羊最小月龄必须大于 0: {}",
            params.min_age_male_months
        )));
    }
    if params.min_age_female_months <= 0 {
        return Err(ApiError::ValidationError(format!(
            "母羊最小月龄必须大于 0: {}",
            params.min_age_female_months
        )));
    }
    if params.weight_adjustment_days <= 0 {
        return Err(ApiError::ValidationError(format!(
            "体重校正目标日龄必须大于 0: {}",
            params.weight_adjustment_days
        )));
    }
    if !params.max_female_percentage_per_male.is_finite()
        || params.max_female_percentage_per_male <= 0.0
        || params.max_female_percentage_per_male > 100.0
    {
        return Err(ApiError::ValidationError(format!(
            "单公覆配比例必须在 (0, 100] 范围内: {}",
            params.max_female_percentage_per_male
        )));
    }
    Ok(())
}

/// 校验遗传评估直调入参（不经过完整模拟参数时使用）
pub fn validate_evaluation_inputs(
    heritability: f64,
    weight_adjustment_days: i64,
) -> ApiResult<()> {
    if !heritability.is_finite() || !(0.0..=1.0).contains(&heritability) {
        return Err(ApiError::ValidationError(format!(
            "遗传力必须在 [0, 1] 范围内: {}",
            heritability
        )));
    }
    if weight_adjustment_days <= 0 {
        return Err(ApiError::ValidationError(format!(
            "体重校正目标日龄必须大于 0: {}",
            weight_adjustment_days
        )));
    }
    Ok(())
}
