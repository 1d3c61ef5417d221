// ==========================================
// 种羊选配决策支持系统 - 选配模拟编排器
// ==========================================
// 职责: 资格筛选 → 遗传评估 → 亲缘解析 → 配对分配 的单次编排
// 红线: 编排器是冻结输入上的纯函数（除 id/时间戳生成外）,
//       不持有跨运行状态,不触数据库;同输入重跑产出同一配对序列
// ==========================================

use crate::config::EngineParams;
use crate::domain::animal::{Animal, PhenotypeRecord};
use crate::domain::mating::{Recommendation, SimulationParameters, SimulationSession};
use crate::domain::types::RecommendationStatus;
use crate::engine::allocator::MateAllocator;
use crate::engine::eligibility::EligibilityFilter;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::evaluator::GeneticEvaluator;
use crate::engine::pedigree::PedigreeResolver;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// 一次模拟运行的完整报告
///
/// 空候选、容量缺口、系谱环都是报告内容而非错误:
/// 运行本身成功,数据质量问题随结果一并上报。
#[derive(Debug, Clone)]
pub struct SimulationRunReport {
    pub session: SimulationSession,
    pub recommendations: Vec<Recommendation>,
    pub eligible_sire_count: usize,
    pub eligible_dam_count: usize,
    pub missing_birth_date_count: usize,
    /// 候选集为空时的原因说明（两侧任一为空）
    pub empty_candidate_reason: Option<String>,
    pub capacity_shortfall: bool,
    pub unpaired_dam_ids: Vec<i64>,
    /// 近交系数计算中命中系谱环的动物
    pub cycle_flagged_animals: Vec<i64>,
    /// 因系谱环被跳过的候选配对
    pub cycle_flagged_pairs: Vec<(i64, i64)>,
}

// ==========================================
// SimulationOrchestrator - 模拟编排器
// ==========================================

pub struct SimulationOrchestrator {
    params: EngineParams,
}

impl SimulationOrchestrator {
    /// 构造编排器（引擎参数先过校验）
    pub fn new(params: EngineParams) -> EngineResult<Self> {
        params.validate().map_err(EngineError::InvalidParameter)?;
        Ok(Self { params })
    }

    /// 执行一次选配模拟
    ///
    /// # 参数
    /// - `candidate_sires` / `candidate_dams`: 用户圈定的候选集（冻结快照）
    /// - `pedigree_animals`: 系谱闭包（候选 + 可追溯祖先）
    /// - `records`: 候选动物的称重/体型记录
    /// - `evaluation_date`: 月龄与里程碑计算的基准日
    pub fn run(
        &self,
        parameters: SimulationParameters,
        candidate_sires: Vec<Animal>,
        candidate_dams: Vec<Animal>,
        pedigree_animals: &[Animal],
        records: &HashMap<i64, Vec<PhenotypeRecord>>,
        evaluation_date: NaiveDate,
    ) -> EngineResult<SimulationRunReport> {
        let simulation_id = Uuid::new_v4().to_string();
        info!(
            simulation_id = %simulation_id,
            herd_id = %parameters.herd_id,
            sires = candidate_sires.len(),
            dams = candidate_dams.len(),
            method = %parameters.selection_method,
            "步骤 0: 选配模拟启动"
        );

        // ===== 步骤 1: 资格筛选 =====
        let mut candidates = candidate_sires;
        candidates.extend(candidate_dams);
        let eligibility = EligibilityFilter::filter(
            &candidates,
            evaluation_date,
            parameters.min_age_male_months,
            parameters.min_age_female_months,
        );
        info!(
            eligible_sires = eligibility.males.len(),
            eligible_dams = eligibility.females.len(),
            missing_birth_date = eligibility.missing_birth_date_count,
            underage = eligibility.underage_count,
            "步骤 1: 资格筛选完成"
        );

        // ===== 步骤 2: 系谱解析器（候选 + 祖先闭包）=====
        let resolver =
            PedigreeResolver::from_animals(pedigree_animals, self.params.max_pedigree_depth);

        // ===== 步骤 3: 遗传评估 =====
        let evaluator = GeneticEvaluator::new(self.params.clone());
        let mut eligible: Vec<Animal> = eligibility.males.clone();
        eligible.extend(eligibility.females.iter().cloned());
        let evaluation = evaluator.evaluate(
            &eligible,
            records,
            &resolver,
            parameters.heritability,
            parameters.weight_adjustment_days,
            parameters.selection_method,
        );
        info!(
            estimates = evaluation.estimates.len(),
            cycle_flagged = evaluation.cycle_flagged.len(),
            "步骤 3: 遗传评估完成"
        );

        // ===== 步骤 4: 配对分配 =====
        let empty_candidate_reason = empty_reason(&eligibility.males, &eligibility.females);
        let allocator = MateAllocator::new(self.params.inbreeding_penalty);
        let allocation = allocator.allocate(
            &eligibility.males,
            &eligibility.females,
            &evaluation.estimates,
            &resolver,
            parameters.max_female_percentage_per_male,
        );
        info!(
            pairs = allocation.pairs.len(),
            unpaired_dams = allocation.unpaired_dam_ids.len(),
            capacity_per_sire = allocation.capacity_per_sire,
            capacity_shortfall = allocation.capacity_shortfall,
            "步骤 4: 配对分配完成"
        );

        // ===== 步骤 5: 会话与推荐物化 =====
        let session = SimulationSession {
            simulation_id: simulation_id.clone(),
            parameters,
            sire_ids: eligibility.males.iter().map(|a| a.animal_id).collect(),
            dam_ids: eligibility.females.iter().map(|a| a.animal_id).collect(),
            created_at: chrono::Local::now().naive_local(),
        };
        let recommendations: Vec<Recommendation> = allocation
            .pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| Recommendation {
                recommendation_id: Uuid::new_v4().to_string(),
                simulation_id: simulation_id.clone(),
                sire_id: pair.sire_id,
                dam_id: pair.dam_id,
                predicted_offspring_index: pair.predicted_offspring_index,
                predicted_inbreeding: pair.predicted_inbreeding,
                predicted_genetic_gain: pair.score,
                predicted_dep: pair.predicted_dep,
                status: RecommendationStatus::Pending,
                rank: (i + 1) as i64,
            })
            .collect();

        info!(
            simulation_id = %simulation_id,
            recommendations = recommendations.len(),
            "步骤 5: 选配模拟完成"
        );

        Ok(SimulationRunReport {
            eligible_sire_count: session.sire_ids.len(),
            eligible_dam_count: session.dam_ids.len(),
            session,
            recommendations,
            missing_birth_date_count: eligibility.missing_birth_date_count,
            empty_candidate_reason,
            capacity_shortfall: allocation.capacity_shortfall,
            unpaired_dam_ids: allocation.unpaired_dam_ids,
            cycle_flagged_animals: evaluation.cycle_flagged,
            cycle_flagged_pairs: allocation.cycle_flagged_pairs,
        })
    }
}

fn empty_reason(males: &[Animal], females: &[Animal]) -> Option<String> {
    match (males.is_empty(), females.is_empty()) {
        (true, true) => Some("筛选后无达龄公羊且无达龄母羊".to_string()),
        (true, false) => Some("筛选后无达龄公羊".to_string()),
        (false, true) => Some("筛选后无达龄母羊".to_string()),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SelectionMethod, Sex};

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

    fn parameters() -> SimulationParameters {
        SimulationParameters {
            herd_id: "H001".to_string(),
            heritability: 0.3,
            selection_method: SelectionMethod::IndividualMassal,
            min_age_male_months: 12,
            min_age_female_months: 10,
            weight_adjustment_days: 60,
            max_female_percentage_per_male: 50.0,
            observations: None,
        }
    }

    fn eval_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    #[test]
    fn test_invalid_engine_params_rejected() {
        let params = EngineParams {
            inbreeding_penalty: f64::NAN,
            ..EngineParams::default()
        };
        assert!(matches!(
            SimulationOrchestrator::new(params),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_run_produces_ranked_pending_recommendations() {
        let orchestrator = SimulationOrchestrator::new(EngineParams::default()).unwrap();
        let sires = vec![animal(1, Sex::Male, "2023-01-01")];
        let dams = vec![
            animal(2, Sex::Female, "2023-06-01"),
            animal(3, Sex::Female, "2023-07-01"),
        ];
        let mut pedigree = sires.clone();
        pedigree.extend(dams.iter().cloned());

        let report = orchestrator
            .run(
                parameters(),
                sires,
                dams,
                &pedigree,
                &HashMap::new(),
                eval_date(),
            )
            .unwrap();

        assert_eq!(report.eligible_sire_count, 1);
        assert_eq!(report.eligible_dam_count, 2);
        // 50% × 2 母羊 → 容量 1,仅 1 条推荐
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.unpaired_dam_ids.len(), 1);
        assert!(report.capacity_shortfall);
        for (i, rec) in report.recommendations.iter().enumerate() {
            assert_eq!(rec.rank, (i + 1) as i64);
            assert_eq!(rec.status, RecommendationStatus::Pending);
            assert_eq!(rec.simulation_id, report.session.simulation_id);
        }
    }

    #[test]
    fn test_empty_candidate_side_reported_not_error() {
        let orchestrator = SimulationOrchestrator::new(EngineParams::default()).unwrap();
        // 公羊未达龄 → 筛选后公侧为空
        let sires = vec![animal(1, Sex::Male, "2025-06-01")];
        let dams = vec![animal(2, Sex::Female, "2023-06-01")];
        let mut pedigree = sires.clone();
        pedigree.extend(dams.iter().cloned());

        let report = orchestrator
            .run(
                parameters(),
                sires,
                dams,
                &pedigree,
                &HashMap::new(),
                eval_date(),
            )
            .unwrap();

        assert!(report.recommendations.is_empty());
        assert!(report.empty_candidate_reason.is_some());
        assert_eq!(report.eligible_sire_count, 0);
        assert_eq!(report.eligible_dam_count, 1);
    }
}
