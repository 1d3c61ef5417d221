// ==========================================
// 种羊选配决策支持系统 - 动物与表型实体
// ==========================================
// 说明: 动物档案与称重记录由外部档案库负责维护,
//       本引擎只读取,不回写
// ==========================================

use crate::domain::types::Sex;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Animal - 动物档案
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animal {
    pub animal_id: i64,
    pub herd_id: String,
    /// 耳标号（档案库唯一标识）
    pub earring_identification: String,
    pub name: Option<String>,
    pub sex: Sex,
    /// 出生日期可能缺失（历史档案）；缺失的动物不参与选配
    pub birth_date: Option<NaiveDate>,
    pub mother_id: Option<i64>,
    pub father_id: Option<i64>,
}

impl Animal {
    /// 计算指定日期的月龄
    ///
    /// # 规则
    /// - 月龄 = floor(出生至评估日天数 / 30)
    /// - 出生日期缺失或晚于评估日 → None
    pub fn age_in_months(&self, on: NaiveDate) -> Option<i64> {
        let birth = self.birth_date?;
        let days = on.signed_duration_since(birth).num_days();
        if days < 0 {
            return None;
        }
        Some(days / 30)
    }

    /// 计算指定日期的日龄
    pub fn age_in_days(&self, on: NaiveDate) -> Option<i64> {
        let birth = self.birth_date?;
        let days = on.signed_duration_since(birth).num_days();
        if days < 0 {
            return None;
        }
        Some(days)
    }
}

// ==========================================
// PhenotypeRecord - 称重与体型评分记录
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhenotypeRecord {
    pub animal_id: i64,
    pub measurement_date: NaiveDate,
    /// 体重（kg）
    pub weight_kg: f64,
    /// 体况评分 ECC（1-5）
    pub body_condition_score: Option<i32>,
    /// 体型 C（1-5）
    pub conformation: Option<i32>,
    /// 早熟性 P（1-5）
    pub precocity: Option<i32>,
    /// 肌肉度 M（1-5）
    pub musculature: Option<i32>,
}
