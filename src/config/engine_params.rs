// ==========================================
// 种羊选配决策支持系统 - 引擎参数
// ==========================================
// 职责: 选配引擎的策略参数（带文档化默认值）
// 红线: 禁止在引擎代码中埋魔法数字，所有策略常量集中于此
// ==========================================

use serde::{Deserialize, Serialize};

/// 选配引擎参数
///
/// 与 `SimulationParameters`（业务输入，每次模拟由用户给定）不同，
/// 本结构承载的是育种策略层面的可调常量，随部署配置而非随请求变化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineParams {
    /// 近交惩罚权重（配对评分中 kinship 的系数）
    ///
    /// 选择指数采用 z 分数合成，标准差为 1.0；默认 4.0 使得
    /// 亲缘系数 0.25（全同胞水平）恰好抵消一个标准差的指数优势。
    pub inbreeding_penalty: f64,

    /// 里程碑体重取数窗口（±天）
    ///
    /// 60/120/180 日龄生长里程碑的常规容差为 ±15 天。
    pub weight_window_tolerance_days: i64,

    /// 选择指数性状权重（非负，总和为 1）
    pub index_weight_weight: f64,
    pub index_weight_conformation: f64,
    pub index_weight_precocity: f64,
    pub index_weight_musculature: f64,

    /// 同期群出生月份分桶宽度（月）
    pub cohort_bucket_months: u32,

    /// 系谱递归代数上限（超过视为无亲缘，保证终止）
    pub max_pedigree_depth: u32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            inbreeding_penalty: 4.0,
            weight_window_tolerance_days: 15,
            index_weight_weight: 0.4,
            index_weight_conformation: 0.2,
            index_weight_precocity: 0.2,
            index_weight_musculature: 0.2,
            cohort_bucket_months: 3,
            max_pedigree_depth: 10,
        }
    }
}

impl EngineParams {
    /// 校验参数合法性
    ///
    /// # 返回
    /// - Ok(()) 参数合法
    /// - Err(String) 首个违规项的说明
    pub fn validate(&self) -> Result<(), String> {
        if self.inbreeding_penalty < 0.0 || !self.inbreeding_penalty.is_finite() {
            return Err(format!(
                "inbreeding_penalty 必须为非负有限值: {}",
                self.inbreeding_penalty
            ));
        }
        if self.weight_window_tolerance_days < 0 {
            return Err(format!(
                "weight_window_tolerance_days 必须非负: {}",
                self.weight_window_tolerance_days
            ));
        }

        let weights = [
            self.index_weight_weight,
            self.index_weight_conformation,
            self.index_weight_precocity,
            self.index_weight_musculature,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err("选择指数性状权重必须为非负有限值".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("选择指数性状权重总和必须为 1，当前为 {}", sum));
        }

        if self.cohort_bucket_months == 0 || self.cohort_bucket_months > 12 {
            return Err(format!(
                "cohort_bucket_months 必须在 1..=12 范围内: {}",
                self.cohort_bucket_months
            ));
        }
        if self.max_pedigree_depth == 0 {
            return Err("max_pedigree_depth 必须大于 0".to_string());
        }
        Ok(())
    }
}
