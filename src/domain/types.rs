// ==========================================
// 种羊选配决策支持系统 - 领域类型定义
// ==========================================
// 红线: 状态为枚举制,不是自由文本
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 性别 (Sex)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,   // 公羊
    Female, // 母羊
}

impl Sex {
    /// 数据库存储码（M/F）
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Sex> {
        match s.trim().to_uppercase().as_str() {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            _ => None,
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 选择方法 (Selection Method)
// ==========================================
// individual_massal: 个体表型选择,仅按体重性状排名
// selection_index: 多性状 z 分数加权合成指数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    IndividualMassal,
    SelectionIndex,
}

impl SelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMethod::IndividualMassal => "individual_massal",
            SelectionMethod::SelectionIndex => "selection_index",
        }
    }

    pub fn parse(s: &str) -> Option<SelectionMethod> {
        match s.trim().to_lowercase().as_str() {
            "individual_massal" => Some(SelectionMethod::IndividualMassal),
            "selection_index" => Some(SelectionMethod::SelectionIndex),
            _ => None,
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 推荐状态 (Recommendation Status)
// ==========================================
// 状态机: PENDING -> ADOPTED, PENDING -> IGNORED
// 红线: 不允许逆向转换,不允许跳转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Pending, // 待处理
    Adopted, // 已采纳
    Ignored, // 已忽略
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "PENDING",
            RecommendationStatus::Adopted => "ADOPTED",
            RecommendationStatus::Ignored => "IGNORED",
        }
    }

    pub fn parse(s: &str) -> Option<RecommendationStatus> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(RecommendationStatus::Pending),
            "ADOPTED" => Some(RecommendationStatus::Adopted),
            "IGNORED" => Some(RecommendationStatus::Ignored),
            _ => None,
        }
    }

    /// 状态机守卫: 仅允许 PENDING -> ADOPTED / PENDING -> IGNORED
    pub fn can_transition_to(&self, target: RecommendationStatus) -> bool {
        matches!(
            (self, target),
            (
                RecommendationStatus::Pending,
                RecommendationStatus::Adopted
            ) | (
                RecommendationStatus::Pending,
                RecommendationStatus::Ignored
            )
        )
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
