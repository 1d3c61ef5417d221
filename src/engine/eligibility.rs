// ==========================================
// 种羊选配决策支持系统 - 配种资格筛选引擎
// ==========================================
// 职责: 按性别与最小月龄筛出可配种候选
// 红线: 出生日期缺失不是错误,是数据质量事件,计数上报
// ==========================================

use crate::domain::animal::Animal;
use crate::domain::types::Sex;
use chrono::NaiveDate;
use tracing::debug;

/// 资格筛选结果
#[derive(Debug, Clone, Default)]
pub struct EligibilityReport {
    /// 达龄公羊
    pub males: Vec<Animal>,
    /// 达龄母羊
    pub females: Vec<Animal>,
    /// 出生日期缺失（或晚于评估日）被排除的数量
    pub missing_birth_date_count: usize,
    /// 未达龄被排除的数量
    pub underage_count: usize,
}

// ==========================================
// EligibilityFilter - 资格筛选器
// ==========================================

pub struct EligibilityFilter;

impl EligibilityFilter {
    /// 筛选可配种候选
    ///
    /// # 规则
    /// - 月龄 = floor(出生至评估日天数 / 30)
    /// - 公羊: 月龄 ≥ min_age_male_months
    /// - 母羊: 月龄 ≥ min_age_female_months
    /// - 出生日期缺失 → 排除并计数
    pub fn filter(
        animals: &[Animal],
        evaluation_date: NaiveDate,
        min_age_male_months: i64,
        min_age_female_months: i64,
    ) -> EligibilityReport {
        let mut report = EligibilityReport::default();

        for animal in animals {
            let age_months = match animal.age_in_months(evaluation_date) {
                Some(age) => age,
                None => {
                    report.missing_birth_date_count += 1;
                    continue;
                }
            };

            match animal.sex {
                Sex::Male if age_months >= min_age_male_months => {
                    report.males.push(animal.clone());
                }
                Sex::Female if age_months >= min_age_female_months => {
                    report.females.push(animal.clone());
                }
                _ => report.underage_count += 1,
            }
        }

        debug!(
            males = report.males.len(),
            females = report.females.len(),
            missing_birth_date = report.missing_birth_date_count,
            underage = report.underage_count,
            "资格筛选完成"
        );

        report
    }
}
