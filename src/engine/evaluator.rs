// ==========================================
// 种羊选配决策支持系统 - 遗传评估引擎
// ==========================================
// 职责: 里程碑体重取数 → 同期群离差 → DEP → 选择指数
// 红线: 纯内存计算,不触数据库;估计结果按运行派生,不回写档案
// ==========================================
// 计算链:
// 1. 里程碑体重: 称重日龄最接近目标日龄且落在 ±容差窗口内的记录
// 2. 同期群: (群, 性别, 出生季度桶),组内均值为基准
// 3. 表型离差 = 里程碑体重 - 同期群均值
// 4. DEP = 0.5 × h² × 表型离差
// 5. individual_massal: 指数 = DEP
//    selection_index:   指数 = Σ w_t × z_t（缺失性状剔除后权重归一化）
// ==========================================

use crate::config::EngineParams;
use crate::domain::animal::{Animal, PhenotypeRecord};
use crate::domain::genetics::GeneticMeritEstimate;
use crate::domain::types::{SelectionMethod, Sex};
use crate::engine::error::EngineError;
use crate::engine::pedigree::PedigreeResolver;
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use tracing::{debug, warn};

/// 同期群键: (群, 性别, 出生年, 出生月桶)
type CohortKey = (String, Sex, i32, u32);

/// 一次评估运行的产出
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub estimates: HashMap<i64, GeneticMeritEstimate>,
    /// 近交系数计算中命中系谱环的动物（F 按 0 记,需人工修档）
    pub cycle_flagged: Vec<i64>,
}

// ==========================================
// GeneticEvaluator - 遗传评估器
// ==========================================

pub struct GeneticEvaluator {
    params: EngineParams,
}

impl GeneticEvaluator {
    pub fn new(params: EngineParams) -> Self {
        Self { params }
    }

    /// 对一批动物执行遗传评估
    ///
    /// # 参数
    /// - `records`: 按 animal_id 分组的称重/体型记录
    /// - `heritability`: 遗传力 h²（0-1）
    /// - `weight_adjustment_days`: 目标日龄里程碑（60/120/180 常用）
    ///
    /// # 规则
    /// - 窗口内无合格称重记录 → 体重相关字段为 None,不参与体重排名
    /// - 同期群仅 1 只 → z 分数记 0（无离差基准）
    /// - 系谱环 → 该动物 F 记 0 并列入 cycle_flagged,评估继续
    pub fn evaluate(
        &self,
        animals: &[Animal],
        records: &HashMap<i64, Vec<PhenotypeRecord>>,
        resolver: &PedigreeResolver,
        heritability: f64,
        weight_adjustment_days: i64,
        selection_method: SelectionMethod,
    ) -> EvaluationOutcome {
        // ===== 步骤 1: 里程碑体重与性状均值取数 =====
        let mut milestone_weights: HashMap<i64, f64> = HashMap::new();
        let mut trait_means: HashMap<i64, TraitMeans> = HashMap::new();
        for animal in animals {
            let animal_records = match records.get(&animal.animal_id) {
                Some(r) if !r.is_empty() => r,
                _ => continue,
            };
            if let Some(w) = milestone_weight(
                animal,
                animal_records,
                weight_adjustment_days,
                self.params.weight_window_tolerance_days,
            ) {
                milestone_weights.insert(animal.animal_id, w);
            }
            trait_means.insert(animal.animal_id, TraitMeans::from_records(animal_records));
        }

        // ===== 步骤 2: 同期群分组 =====
        let mut cohorts: HashMap<CohortKey, Vec<i64>> = HashMap::new();
        for animal in animals {
            if let Some(key) = self.cohort_key(animal) {
                cohorts.entry(key).or_default().push(animal.animal_id);
            }
        }

        // ===== 步骤 3: 组内统计（均值/标准差,按性状分别计算）=====
        let mut weight_stats: HashMap<i64, (f64, f64)> = HashMap::new(); // (组均值, 组标准差)
        let mut trait_z: HashMap<i64, TraitZScores> = HashMap::new();
        for members in cohorts.values() {
            let weights: Vec<(i64, f64)> = members
                .iter()
                .filter_map(|id| milestone_weights.get(id).map(|w| (*id, *w)))
                .collect();
            if !weights.is_empty() {
                let values: Vec<f64> = weights.iter().map(|(_, w)| *w).collect();
                let mean = mean_of(&values);
                let sd = sample_std_dev(&values, mean);
                for (id, _) in &weights {
                    weight_stats.insert(*id, (mean, sd));
                }
            }

            for trait_index in 0..TRAIT_COUNT {
                let scores: Vec<(i64, f64)> = members
                    .iter()
                    .filter_map(|id| {
                        trait_means
                            .get(id)
                            .and_then(|t| t.scores[trait_index])
                            .map(|s| (*id, s))
                    })
                    .collect();
                if scores.is_empty() {
                    continue;
                }
                let values: Vec<f64> = scores.iter().map(|(_, s)| *s).collect();
                let mean = mean_of(&values);
                let sd = sample_std_dev(&values, mean);
                for (id, score) in &scores {
                    trait_z.entry(*id).or_default().scores[trait_index] =
                        Some(zscore(*score, mean, sd));
                }
            }
        }

        // ===== 步骤 4: 逐动物合成估计 =====
        let mut estimates = HashMap::with_capacity(animals.len());
        let mut cycle_flagged = Vec::new();
        for animal in animals {
            let inbreeding = match resolver.inbreeding(animal.animal_id) {
                Ok(f) => f,
                Err(EngineError::PedigreeCycle { animal_id }) => {
                    warn!(
                        animal_id = animal.animal_id,
                        cycle_at = animal_id,
                        "系谱环: 近交系数按 0 记,该动物列入修档清单"
                    );
                    cycle_flagged.push(animal.animal_id);
                    0.0
                }
                Err(e) => {
                    warn!(animal_id = animal.animal_id, error = %e, "近交系数计算失败,按 0 记");
                    0.0
                }
            };

            let mut estimate = GeneticMeritEstimate::empty(animal.animal_id, inbreeding);

            if let Some(weight) = milestone_weights.get(&animal.animal_id) {
                estimate.adjusted_weight_kg = Some(*weight);
                if let Some((mean, sd)) = weight_stats.get(&animal.animal_id) {
                    let deviation = weight - mean;
                    let dep = 0.5 * heritability * deviation;
                    estimate.weight_deviation_kg = Some(deviation);
                    estimate.dep = Some(dep);

                    estimate.selection_index = match selection_method {
                        SelectionMethod::IndividualMassal => Some(dep),
                        SelectionMethod::SelectionIndex => Some(self.composite_index(
                            zscore(*weight, *mean, *sd),
                            trait_z.get(&animal.animal_id),
                        )),
                    };
                }
            }

            estimates.insert(animal.animal_id, estimate);
        }

        debug!(
            total = animals.len(),
            with_milestone_weight = milestone_weights.len(),
            cohorts = cohorts.len(),
            cycle_flagged = cycle_flagged.len(),
            "遗传评估完成"
        );

        EvaluationOutcome {
            estimates,
            cycle_flagged,
        }
    }

    /// 同期群键（出生日期缺失 → 无同期群）
    fn cohort_key(&self, animal: &Animal) -> Option<CohortKey> {
        let birth = animal.birth_date?;
        let bucket = birth.month0() / self.params.cohort_bucket_months;
        Some((animal.herd_id.clone(), animal.sex, birth.year(), bucket))
    }

    /// 多性状 z 分数加权合成（缺失性状剔除,剩余权重归一化）
    fn composite_index(&self, weight_z: f64, traits: Option<&TraitZScores>) -> f64 {
        let trait_weights = [
            self.params.index_weight_conformation,
            self.params.index_weight_precocity,
            self.params.index_weight_musculature,
        ];

        let mut weighted_sum = self.params.index_weight_weight * weight_z;
        let mut weight_total = self.params.index_weight_weight;
        if let Some(traits) = traits {
            for (z, w) in traits.scores.iter().zip(trait_weights) {
                if let Some(z) = z {
                    weighted_sum += w * z;
                    weight_total += w;
                }
            }
        }
        if weight_total <= f64::EPSILON {
            return 0.0;
        }
        weighted_sum / weight_total
    }
}

// ==========================================
// 取数与统计工具
// ==========================================

/// 体型性状数（C/P/M）
const TRAIT_COUNT: usize = 3;

/// 动物的体型性状均值（按记录求均,缺失记录剔除）
#[derive(Debug, Clone, Copy, Default)]
struct TraitMeans {
    /// [体型 C, 早熟性 P, 肌肉度 M]
    scores: [Option<f64>; TRAIT_COUNT],
}

impl TraitMeans {
    fn from_records(records: &[PhenotypeRecord]) -> Self {
        let mut means = Self::default();
        let extractors: [fn(&PhenotypeRecord) -> Option<i32>; TRAIT_COUNT] = [
            |r| r.conformation,
            |r| r.precocity,
            |r| r.musculature,
        ];
        for (slot, extract) in means.scores.iter_mut().zip(extractors) {
            let values: Vec<f64> = records
                .iter()
                .filter_map(|r| extract(r).map(f64::from))
                .collect();
            if !values.is_empty() {
                *slot = Some(mean_of(&values));
            }
        }
        means
    }
}

/// 组 z 分数（组内仅 1 只或标准差为 0 时记 0）
#[derive(Debug, Clone, Copy, Default)]
struct TraitZScores {
    scores: [Option<f64>; TRAIT_COUNT],
}

/// 里程碑体重: 称重日龄最接近目标且在 ±容差窗口内的记录
///
/// 同距取测量日期较早者,保证取数确定性。
fn milestone_weight(
    animal: &Animal,
    records: &[PhenotypeRecord],
    target_age_days: i64,
    tolerance_days: i64,
) -> Option<f64> {
    let birth = animal.birth_date?;
    let mut best: Option<(i64, NaiveDate, f64)> = None;
    for record in records {
        let age_days = record
            .measurement_date
            .signed_duration_since(birth)
            .num_days();
        if age_days < 0 {
            continue;
        }
        let distance = (age_days - target_age_days).abs();
        if distance > tolerance_days {
            continue;
        }
        let candidate = (distance, record.measurement_date, record.weight_kg);
        best = match best {
            None => Some(candidate),
            Some(current) => {
                if (candidate.0, candidate.1) < (current.0, current.1) {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    best.map(|(_, _, weight)| weight)
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// 样本标准差（n-1）,n < 2 时返回 0
fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|v| (v - mean) * (v - mean))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

fn zscore(value: f64, mean: f64, sd: f64) -> f64 {
    if sd <= f64::EPSILON {
        return 0.0;
    }
    (value - mean) / sd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pedigree::PedigreeResolver;

    const EPS: f64 = 1e-9;

    fn animal(id: i64, sex: Sex, birth: &str) -> Animal {
        Animal {
            animal_id: id,
            herd_id: "H001".to_string(),
            earring_identification: format!("BR-{id:04}"),
            name: None,
            sex,
            birth_date: Some(NaiveDate::parse_from_str(birth, "%Y-%m-%d").unwrap()),
            mother_id: None,
            father_id: None,
        }
    }

    fn weight_record(id: i64, date: &str, weight: f64) -> PhenotypeRecord {
        PhenotypeRecord {
            animal_id: id,
            measurement_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            weight_kg: weight,
            body_condition_score: None,
            conformation: None,
            precocity: None,
            musculature: None,
        }
    }

    fn evaluator() -> GeneticEvaluator {
        GeneticEvaluator::new(EngineParams::default())
    }

    fn run(
        animals: &[Animal],
        records: &HashMap<i64, Vec<PhenotypeRecord>>,
        method: SelectionMethod,
    ) -> EvaluationOutcome {
        let resolver = PedigreeResolver::from_animals(animals, 10);
        evaluator().evaluate(animals, records, &resolver, 0.3, 60, method)
    }

    // ==========================================
    // 里程碑取数
    // ==========================================

    #[test]
    fn test_milestone_picks_closest_within_window() {
        let a = animal(1, Sex::Male, "2025-01-01");
        // 日龄 50 / 62 / 90,目标 60 ±15 → 取 62 日龄的 21.0
        let records = vec![
            weight_record(1, "2025-02-20", 18.0),
            weight_record(1, "2025-03-04", 21.0),
            weight_record(1, "2025-04-01", 27.0),
        ];
        assert_eq!(milestone_weight(&a, &records, 60, 15), Some(21.0));
    }

    #[test]
    fn test_milestone_none_outside_window() {
        let a = animal(1, Sex::Male, "2025-01-01");
        // 仅 90 日龄记录,目标 60 ±15 → 无
        let records = vec![weight_record(1, "2025-04-01", 27.0)];
        assert_eq!(milestone_weight(&a, &records, 60, 15), None);
    }

    #[test]
    fn test_milestone_tie_prefers_earlier_date() {
        let a = animal(1, Sex::Male, "2025-01-01");
        // 日龄 55 与 65 距目标同为 5 → 取较早的 55 日龄
        let records = vec![
            weight_record(1, "2025-03-07", 22.0), // 65 日龄
            weight_record(1, "2025-02-25", 19.0), // 55 日龄
        ];
        assert_eq!(milestone_weight(&a, &records, 60, 15), Some(19.0));
    }

    // ==========================================
    // 离差 / DEP / 指数
    // ==========================================

    #[test]
    fn test_dep_from_cohort_deviation() {
        // 同群同性别同季度 3 只: 体重 18/20/22 → 均值 20
        let animals = vec![
            animal(1, Sex::Male, "2025-01-10"),
            animal(2, Sex::Male, "2025-02-10"),
            animal(3, Sex::Male, "2025-03-10"),
        ];
        let mut records = HashMap::new();
        records.insert(1, vec![weight_record(1, "2025-03-11", 18.0)]);
        records.insert(2, vec![weight_record(2, "2025-04-11", 20.0)]);
        records.insert(3, vec![weight_record(3, "2025-05-09", 22.0)]);

        let outcome = run(&animals, &records, SelectionMethod::IndividualMassal);
        let e3 = &outcome.estimates[&3];
        assert!((e3.weight_deviation_kg.unwrap() - 2.0).abs() < EPS);
        // DEP = 0.5 × 0.3 × 2.0 = 0.3,massal 下指数 = DEP
        assert!((e3.dep.unwrap() - 0.3).abs() < EPS);
        assert!((e3.selection_index.unwrap() - 0.3).abs() < EPS);
    }

    #[test]
    fn test_no_record_in_window_yields_no_weight_fields() {
        let animals = vec![
            animal(1, Sex::Male, "2025-01-10"),
            animal(2, Sex::Male, "2025-02-10"),
        ];
        let mut records = HashMap::new();
        records.insert(1, vec![weight_record(1, "2025-03-11", 18.0)]);
        // 2 号无窗口内记录
        records.insert(2, vec![weight_record(2, "2025-08-01", 30.0)]);

        let outcome = run(&animals, &records, SelectionMethod::IndividualMassal);
        let e2 = &outcome.estimates[&2];
        assert!(e2.adjusted_weight_kg.is_none());
        assert!(e2.dep.is_none());
        assert!(e2.selection_index.is_none());
        // 估计仍存在且携带近交系数
        assert!((e2.inbreeding_coefficient - 0.0).abs() < EPS);
    }

    #[test]
    fn test_singleton_cohort_zscore_is_zero() {
        // 不同性别 → 各自独立同期群,组内仅 1 只
        let animals = vec![
            animal(1, Sex::Male, "2025-01-10"),
            animal(2, Sex::Female, "2025-01-10"),
        ];
        let mut records = HashMap::new();
        records.insert(1, vec![weight_record(1, "2025-03-11", 18.0)]);
        records.insert(2, vec![weight_record(2, "2025-03-11", 24.0)]);

        let outcome = run(&animals, &records, SelectionMethod::SelectionIndex);
        // 组内仅 1 只 → 离差 0,z 分数 0,指数 0
        assert!((outcome.estimates[&1].selection_index.unwrap() - 0.0).abs() < EPS);
        assert!((outcome.estimates[&2].selection_index.unwrap() - 0.0).abs() < EPS);
    }

    #[test]
    fn test_selection_index_renormalizes_missing_traits() {
        // 无任何体型性状记录 → 指数退化为纯体重 z 分数
        let animals = vec![
            animal(1, Sex::Male, "2025-01-10"),
            animal(2, Sex::Male, "2025-02-10"),
            animal(3, Sex::Male, "2025-03-10"),
        ];
        let mut records = HashMap::new();
        records.insert(1, vec![weight_record(1, "2025-03-11", 18.0)]);
        records.insert(2, vec![weight_record(2, "2025-04-11", 20.0)]);
        records.insert(3, vec![weight_record(3, "2025-05-09", 22.0)]);

        let outcome = run(&animals, &records, SelectionMethod::SelectionIndex);
        // 体重 18/20/22,样本标准差 2 → z = (22-20)/2 = 1
        assert!((outcome.estimates[&3].selection_index.unwrap() - 1.0).abs() < EPS);
        assert!((outcome.estimates[&1].selection_index.unwrap() + 1.0).abs() < EPS);
    }

    #[test]
    fn test_selection_index_with_trait_scores() {
        let animals = vec![
            animal(1, Sex::Male, "2025-01-10"),
            animal(2, Sex::Male, "2025-02-10"),
        ];
        let mut rec1 = weight_record(1, "2025-03-11", 18.0);
        rec1.conformation = Some(2);
        let mut rec2 = weight_record(2, "2025-04-11", 22.0);
        rec2.conformation = Some(4);
        let mut records = HashMap::new();
        records.insert(1, vec![rec1]);
        records.insert(2, vec![rec2]);

        let outcome = run(&animals, &records, SelectionMethod::SelectionIndex);
        // 体重 z 与体型 z 同向（2 号均占优）: 权重 0.4/0.2 归一化后
        // 指数 = (0.4 × z_w + 0.2 × z_c) / 0.6,z_w = z_c = +1/√2 … 样本标准差下
        // 两只组 z = ±0.7071;指数 = ±0.7071
        let e2 = outcome.estimates[&2].selection_index.unwrap();
        let e1 = outcome.estimates[&1].selection_index.unwrap();
        assert!((e2 - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((e1 + std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    // ==========================================
    // 系谱环容错
    // ==========================================

    #[test]
    fn test_cycle_flagged_and_f_zero() {
        let mut a1 = animal(1, Sex::Male, "2025-01-10");
        a1.mother_id = Some(2);
        a1.father_id = Some(3);
        let mut a2 = animal(2, Sex::Female, "2025-02-10");
        a2.mother_id = Some(1);
        a2.father_id = Some(3);
        let a3 = animal(3, Sex::Male, "2024-01-10");
        let animals = vec![a1, a2, a3];
        let records = HashMap::new();

        let outcome = run(&animals, &records, SelectionMethod::IndividualMassal);
        assert!(!outcome.cycle_flagged.is_empty());
        for id in &outcome.cycle_flagged {
            assert!((outcome.estimates[id].inbreeding_coefficient - 0.0).abs() < EPS);
        }
    }
}
