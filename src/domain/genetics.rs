// ==========================================
// 种羊选配决策支持系统 - 遗传评估实体
// ==========================================
// 说明: 每次评估运行按动物派生,运行之间不共享、不回写档案库
// ==========================================

use serde::{Deserialize, Serialize};

/// 单个动物的遗传价值估计
///
/// 体重相关字段（校正体重/离差/DEP）在取数窗口内无合格称重记录时为 None，
/// 该动物不参与体重性状排名，但仍可携带体型性状与近交系数。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticMeritEstimate {
    pub animal_id: i64,
    /// 目标日龄里程碑的校正体重（kg）
    pub adjusted_weight_kg: Option<f64>,
    /// 相对同期群均值的表型离差（kg）
    pub weight_deviation_kg: Option<f64>,
    /// 直接预期后代差 DEP = 0.5 × h² × 表型离差
    pub dep: Option<f64>,
    /// 选择指数（individual_massal 下等于 DEP；selection_index 下为 z 分数合成）
    pub selection_index: Option<f64>,
    /// 本动物自身的近交系数（由系谱解析,与运行参数无关）
    pub inbreeding_coefficient: f64,
}

impl GeneticMeritEstimate {
    /// 无任何表型数据时的空估计（仅携带近交系数）
    pub fn empty(animal_id: i64, inbreeding_coefficient: f64) -> Self {
        Self {
            animal_id,
            adjusted_weight_kg: None,
            weight_deviation_kg: None,
            dep: None,
            selection_index: None,
            inbreeding_coefficient,
        }
    }
}
