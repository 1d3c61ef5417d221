// ==========================================
// 种羊选配决策支持系统 - 选配模拟实体
// ==========================================
// 红线: SimulationSession 创建后参数与候选集不可变,
//       仅 Recommendation.status 允许按状态机转换
// ==========================================

use crate::domain::types::{RecommendationStatus, SelectionMethod};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// SimulationParameters - 模拟参数快照
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub herd_id: String,
    /// 遗传力 h²（0-1）
    pub heritability: f64,
    pub selection_method: SelectionMethod,
    /// 公羊最小月龄
    pub min_age_male_months: i64,
    /// 母羊最小月龄
    pub min_age_female_months: i64,
    /// 体重校正目标日龄（常用 60/120/180）
    pub weight_adjustment_days: i64,
    /// 单只公羊最多覆配母羊比例（%，(0,100]）
    pub max_female_percentage_per_male: f64,
    pub observations: Option<String>,
}

// ==========================================
// SimulationSession - 模拟会话
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSession {
    pub simulation_id: String,
    pub parameters: SimulationParameters,
    /// 冻结的候选公羊集（创建后不可变）
    pub sire_ids: Vec<i64>,
    /// 冻结的候选母羊集（创建后不可变）
    pub dam_ids: Vec<i64>,
    pub created_at: NaiveDateTime,
}

impl SimulationSession {
    /// 单只公羊容量 = ceil(max_female_percentage_per_male / 100 × |dams|)
    pub fn capacity_per_sire(&self) -> i64 {
        capacity_per_sire(
            self.parameters.max_female_percentage_per_male,
            self.dam_ids.len(),
        )
    }
}

/// 单只公羊容量计算（与会话解耦,供分配器直接调用）
pub fn capacity_per_sire(max_female_percentage_per_male: f64, dam_count: usize) -> i64 {
    (max_female_percentage_per_male / 100.0 * dam_count as f64).ceil() as i64
}

// ==========================================
// Recommendation - 选配推荐
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_id: String,
    pub simulation_id: String,
    pub sire_id: i64,
    pub dam_id: i64,
    /// 预测后代选择指数 = 0.5 × (index(sire) + index(dam))
    pub predicted_offspring_index: f64,
    /// 预测后代近交系数 = kinship(sire, dam)
    pub predicted_inbreeding: f64,
    /// 预测遗传增益（配对目标函数得分,排序依据）
    pub predicted_genetic_gain: f64,
    /// 预测 DEP = 0.5 × (dep(sire) + dep(dam))
    pub predicted_dep: f64,
    pub status: RecommendationStatus,
    /// 会话内排名（1 起,得分降序）
    pub rank: i64,
}

// ==========================================
// CoverageRequest - 覆配落库请求
// ==========================================
// 由 CoverageMaterializer 生成,写入外部繁殖档案库

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageRequest {
    pub herd_id: String,
    pub dam_id: i64,
    pub sire_id: i64,
    pub coverage_date: NaiveDate,
    pub dam_weight_kg: f64,
    /// 母羊体况评分 ECC（1-5）
    pub dam_body_condition_score: i32,
    pub observations: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_per_sire_ceil() {
        // 50% × 10 只母羊 = 5
        assert_eq!(capacity_per_sire(50.0, 10), 5);
        // 50% × 1 只母羊 = ceil(0.5) = 1
        assert_eq!(capacity_per_sire(50.0, 1), 1);
        // 30% × 7 只母羊 = ceil(2.1) = 3
        assert_eq!(capacity_per_sire(30.0, 7), 3);
        // 100% × 4 只母羊 = 4
        assert_eq!(capacity_per_sire(100.0, 4), 4);
        // 空母羊集 → 0
        assert_eq!(capacity_per_sire(50.0, 0), 0);
    }
}
