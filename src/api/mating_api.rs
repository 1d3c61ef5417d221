// ==========================================
// 种羊选配决策支持系统 - 选配业务 API
// ==========================================
// 职责: 面向展示层的六个选配操作
// - 遗传评估 / 可配种候选 / 模拟 / 推荐查询 / 采纳与忽略 / 批量覆配
// 红线: API 层只做编排与转换,业务规则在引擎层,存取在仓储层
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{validate_evaluation_inputs, validate_simulation_parameters};
use crate::config::EngineParams;
use crate::domain::animal::Animal;
use crate::domain::mating::SimulationParameters;
use crate::domain::types::{RecommendationStatus, SelectionMethod};
use crate::engine::evaluator::GeneticEvaluator;
use crate::engine::materializer::CoverageMaterializer;
use crate::engine::orchestrator::SimulationOrchestrator;
use crate::engine::pedigree::PedigreeResolver;
use crate::repository::animal_repo::AnimalRepository;
use crate::repository::coverage_repo::CoverageRepository;
use crate::repository::simulation_repo::SimulationRepository;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// 遗传评估直调时的默认遗传力（羔羊断奶重常用值）
pub const DEFAULT_HERITABILITY: f64 = 0.3;
/// 遗传评估直调时的默认目标日龄（断奶里程碑）
pub const DEFAULT_WEIGHT_ADJUSTMENT_DAYS: i64 = 60;

// ==========================================
// DTO 定义
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticEvaluationEntry {
    pub animal_id: i64,
    pub earring_identification: String,
    pub name: Option<String>,
    pub sex: String,
    pub adjusted_weight_kg: Option<f64>,
    pub weight_deviation_kg: Option<f64>,
    pub dep: Option<f64>,
    pub selection_index: Option<f64>,
    pub inbreeding_coefficient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticEvaluationResponse {
    pub herd_id: String,
    pub total_animals: usize,
    /// 窗口内取到里程碑体重的动物数
    pub with_adjusted_weight: usize,
    /// 系谱环待修档动物
    pub cycle_flagged_animals: Vec<i64>,
    pub entries: Vec<GeneticEvaluationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleAnimalInfo {
    pub animal_id: i64,
    pub earring_identification: String,
    pub name: Option<String>,
    pub age_months: i64,
    pub adjusted_weight_kg: Option<f64>,
    pub dep: Option<f64>,
    pub selection_index: Option<f64>,
    pub inbreeding_coefficient: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibleAnimalsResponse {
    pub herd_id: String,
    pub males: Vec<EligibleAnimalInfo>,
    pub females: Vec<EligibleAnimalInfo>,
    pub missing_birth_date_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateMatingResponse {
    pub simulation_id: String,
    pub total_recommendations: usize,
    pub eligible_sire_count: usize,
    pub eligible_dam_count: usize,
    pub missing_birth_date_count: usize,
    pub capacity_shortfall: bool,
    pub unpaired_dam_ids: Vec<i64>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationInfo {
    pub recommendation_id: String,
    pub rank: i64,
    pub sire_id: i64,
    pub sire_earring: Option<String>,
    pub sire_name: Option<String>,
    pub dam_id: i64,
    pub dam_earring: Option<String>,
    pub dam_name: Option<String>,
    pub predicted_offspring_index: f64,
    pub predicted_inbreeding: f64,
    pub predicted_genetic_gain: f64,
    pub predicted_dep: f64,
    pub status: RecommendationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationListResponse {
    pub simulation_id: String,
    pub total: usize,
    pub recommendations: Vec<RecommendationInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationStatusResponse {
    pub recommendation_id: String,
    pub status: RecommendationStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCoverageItemError {
    pub recommendation_id: String,
    pub sire_id: i64,
    pub dam_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCoverageResponse {
    pub simulation_id: String,
    pub created_count: usize,
    pub errors: Vec<BatchCoverageItemError>,
    pub message: String,
}

// ==========================================
// MatingApi
// ==========================================

pub struct MatingApi {
    animal_repo: Arc<AnimalRepository>,
    simulation_repo: Arc<SimulationRepository>,
    coverage_repo: Arc<CoverageRepository>,
    params: EngineParams,
}

impl MatingApi {
    pub fn new(
        animal_repo: Arc<AnimalRepository>,
        simulation_repo: Arc<SimulationRepository>,
        coverage_repo: Arc<CoverageRepository>,
        params: EngineParams,
    ) -> Self {
        Self {
            animal_repo,
            simulation_repo,
            coverage_repo,
            params,
        }
    }

    // ==========================================
    // 操作 1: 全群遗传评估
    // ==========================================

    /// 对整群执行遗传评估,按选择指数降序返回
    pub async fn calculate_genetic_evaluation(
        &self,
        herd_id: &str,
        heritability: f64,
        weight_adjustment_days: i64,
    ) -> ApiResult<GeneticEvaluationResponse> {
        validate_evaluation_inputs(heritability, weight_adjustment_days)?;
        let animals = self.load_herd(herd_id)?;
        let animal_ids: Vec<i64> = animals.iter().map(|a| a.animal_id).collect();
        let pedigree = self.animal_repo.load_pedigree_closure(&animal_ids)?;
        let records = self.animal_repo.records_for_animals(&animal_ids)?;

        let resolver = PedigreeResolver::from_animals(&pedigree, self.params.max_pedigree_depth);
        let evaluator = GeneticEvaluator::new(self.params.clone());
        let outcome = evaluator.evaluate(
            &animals,
            &records,
            &resolver,
            heritability,
            weight_adjustment_days,
            SelectionMethod::SelectionIndex,
        );

        let mut entries: Vec<GeneticEvaluationEntry> = animals
            .iter()
            .filter_map(|animal| {
                outcome
                    .estimates
                    .get(&animal.animal_id)
                    .map(|e| GeneticEvaluationEntry {
                        animal_id: animal.animal_id,
                        earring_identification: animal.earring_identification.clone(),
                        name: animal.name.clone(),
                        sex: animal.sex.as_str().to_string(),
                        adjusted_weight_kg: e.adjusted_weight_kg,
                        weight_deviation_kg: e.weight_deviation_kg,
                        dep: e.dep,
                        selection_index: e.selection_index,
                        inbreeding_coefficient: e.inbreeding_coefficient,
                    })
            })
            .collect();
        // 指数降序,无指数的沉底,并列按 id 升序
        entries.sort_by(|a, b| {
            b.selection_index
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&a.selection_index.unwrap_or(f64::NEG_INFINITY))
                .then(a.animal_id.cmp(&b.animal_id))
        });

        let with_adjusted_weight = entries
            .iter()
            .filter(|e| e.adjusted_weight_kg.is_some())
            .count();
        info!(
            herd_id,
            total = entries.len(),
            with_adjusted_weight,
            "全群遗传评估完成"
        );
        Ok(GeneticEvaluationResponse {
            herd_id: herd_id.to_string(),
            total_animals: entries.len(),
            with_adjusted_weight,
            cycle_flagged_animals: outcome.cycle_flagged,
            entries,
        })
    }

    // ==========================================
    // 操作 2: 可配种候选查询
    // ==========================================

    /// 按月龄与性别列出可配种候选,附带默认口径的遗传估计
    pub async fn get_eligible_animals(
        &self,
        herd_id: &str,
        min_age_male_months: i64,
        min_age_female_months: i64,
        evaluation_date: NaiveDate,
    ) -> ApiResult<EligibleAnimalsResponse> {
        if min_age_male_months <= 0 || min_age_female_months <= 0 {
            return Err(ApiError::ValidationError(
                "最小月龄必须大于 0".to_string(),
            ));
        }
        let animals = self.load_herd(herd_id)?;
        let animal_ids: Vec<i64> = animals.iter().map(|a| a.animal_id).collect();
        let pedigree = self.animal_repo.load_pedigree_closure(&animal_ids)?;
        let records = self.animal_repo.records_for_animals(&animal_ids)?;

        let eligibility = crate::engine::eligibility::EligibilityFilter::filter(
            &animals,
            evaluation_date,
            min_age_male_months,
            min_age_female_months,
        );

        let resolver = PedigreeResolver::from_animals(&pedigree, self.params.max_pedigree_depth);
        let evaluator = GeneticEvaluator::new(self.params.clone());
        let mut eligible: Vec<Animal> = eligibility.males.clone();
        eligible.extend(eligibility.females.iter().cloned());
        let outcome = evaluator.evaluate(
            &eligible,
            &records,
            &resolver,
            DEFAULT_HERITABILITY,
            DEFAULT_WEIGHT_ADJUSTMENT_DAYS,
            SelectionMethod::SelectionIndex,
        );

        let to_info = |animal: &Animal| -> EligibleAnimalInfo {
            let estimate = outcome.estimates.get(&animal.animal_id);
            EligibleAnimalInfo {
                animal_id: animal.animal_id,
                earring_identification: animal.earring_identification.clone(),
                name: animal.name.clone(),
                age_months: animal.age_in_months(evaluation_date).unwrap_or(0),
                adjusted_weight_kg: estimate.and_then(|e| e.adjusted_weight_kg),
                dep: estimate.and_then(|e| e.dep),
                selection_index: estimate.and_then(|e| e.selection_index),
                inbreeding_coefficient: estimate.map(|e| e.inbreeding_coefficient).unwrap_or(0.0),
            }
        };

        Ok(EligibleAnimalsResponse {
            herd_id: herd_id.to_string(),
            males: eligibility.males.iter().map(to_info).collect(),
            females: eligibility.females.iter().map(to_info).collect(),
            missing_birth_date_count: eligibility.missing_birth_date_count,
        })
    }

    // ==========================================
    // 操作 3: 选配模拟
    // ==========================================

    /// 对冻结的候选集执行一次选配模拟并持久化会话与推荐
    pub async fn simulate_mating(
        &self,
        parameters: SimulationParameters,
        sire_ids: Vec<i64>,
        dam_ids: Vec<i64>,
        evaluation_date: NaiveDate,
    ) -> ApiResult<SimulateMatingResponse> {
        validate_simulation_parameters(&parameters)?;
        let sires = self.load_candidates(&sire_ids, "候选公羊")?;
        let dams = self.load_candidates(&dam_ids, "候选母羊")?;
        for sire in &sires {
            if sire.sex != crate::domain::Sex::Male {
                return Err(ApiError::ValidationError(format!(
                    "候选公羊 {} 的性别不是公",
                    sire.animal_id
                )));
            }
        }
        for dam in &dams {
            if dam.sex != crate::domain::Sex::Female {
                return Err(ApiError::ValidationError(format!(
                    "候选母羊 {} 的性别不是母",
                    dam.animal_id
                )));
            }
        }

        let mut candidate_ids = sire_ids.clone();
        candidate_ids.extend(&dam_ids);
        let pedigree = self.animal_repo.load_pedigree_closure(&candidate_ids)?;
        let records = self.animal_repo.records_for_animals(&candidate_ids)?;

        let orchestrator = SimulationOrchestrator::new(self.params.clone())?;
        let report = orchestrator.run(
            parameters,
            sires,
            dams,
            &pedigree,
            &records,
            evaluation_date,
        )?;

        self.simulation_repo.insert_session(&report.session)?;
        self.simulation_repo
            .insert_recommendations(&report.recommendations)?;

        let message = match &report.empty_candidate_reason {
            Some(reason) => format!("模拟完成,无推荐: {reason}"),
            None if report.capacity_shortfall => format!(
                "模拟完成,产出 {} 条推荐;容量不足,{} 只母羊未获配对",
                report.recommendations.len(),
                report.unpaired_dam_ids.len()
            ),
            None => format!("模拟完成,产出 {} 条推荐", report.recommendations.len()),
        };

        Ok(SimulateMatingResponse {
            simulation_id: report.session.simulation_id.clone(),
            total_recommendations: report.recommendations.len(),
            eligible_sire_count: report.eligible_sire_count,
            eligible_dam_count: report.eligible_dam_count,
            missing_birth_date_count: report.missing_birth_date_count,
            capacity_shortfall: report.capacity_shortfall,
            unpaired_dam_ids: report.unpaired_dam_ids,
            message,
        })
    }

    // ==========================================
    // 操作 4: 推荐查询
    // ==========================================

    /// 会话内全部推荐,按预测遗传增益排名升序（即得分降序）
    pub async fn get_mating_recommendations(
        &self,
        simulation_id: &str,
    ) -> ApiResult<RecommendationListResponse> {
        // 会话不存在要报 NotFound,先取会话再取推荐
        let _session = self.simulation_repo.get_session(simulation_id)?;
        let recommendations = self.simulation_repo.list_recommendations(simulation_id)?;

        let mut involved: Vec<i64> = recommendations
            .iter()
            .flat_map(|r| [r.sire_id, r.dam_id])
            .collect();
        involved.sort_unstable();
        involved.dedup();
        let animals: HashMap<i64, Animal> = self
            .animal_repo
            .find_by_ids(&involved)?
            .into_iter()
            .map(|a| (a.animal_id, a))
            .collect();

        let infos: Vec<RecommendationInfo> = recommendations
            .iter()
            .map(|rec| RecommendationInfo {
                recommendation_id: rec.recommendation_id.clone(),
                rank: rec.rank,
                sire_id: rec.sire_id,
                sire_earring: animals
                    .get(&rec.sire_id)
                    .map(|a| a.earring_identification.clone()),
                sire_name: animals.get(&rec.sire_id).and_then(|a| a.name.clone()),
                dam_id: rec.dam_id,
                dam_earring: animals
                    .get(&rec.dam_id)
                    .map(|a| a.earring_identification.clone()),
                dam_name: animals.get(&rec.dam_id).and_then(|a| a.name.clone()),
                predicted_offspring_index: rec.predicted_offspring_index,
                predicted_inbreeding: rec.predicted_inbreeding,
                predicted_genetic_gain: rec.predicted_genetic_gain,
                predicted_dep: rec.predicted_dep,
                status: rec.status,
            })
            .collect();

        Ok(RecommendationListResponse {
            simulation_id: simulation_id.to_string(),
            total: infos.len(),
            recommendations: infos,
        })
    }

    // ==========================================
    // 操作 5: 采纳 / 忽略
    // ==========================================

    /// 采纳推荐（幂等: 重复采纳返回成功）
    pub async fn adopt_recommendation(
        &self,
        recommendation_id: &str,
    ) -> ApiResult<RecommendationStatusResponse> {
        let updated = self.simulation_repo.adopt(recommendation_id)?;
        info!(recommendation_id, "推荐已采纳");
        Ok(RecommendationStatusResponse {
            recommendation_id: updated.recommendation_id,
            status: updated.status,
            message: "推荐已采纳".to_string(),
        })
    }

    /// 忽略推荐（幂等: 重复忽略返回成功;已采纳的不可忽略）
    pub async fn ignore_recommendation(
        &self,
        recommendation_id: &str,
    ) -> ApiResult<RecommendationStatusResponse> {
        let updated = self.simulation_repo.ignore(recommendation_id)?;
        info!(recommendation_id, "推荐已忽略");
        Ok(RecommendationStatusResponse {
            recommendation_id: updated.recommendation_id,
            status: updated.status,
            message: "推荐已忽略".to_string(),
        })
    }

    // ==========================================
    // 操作 6: 批量覆配落库
    // ==========================================

    /// 将会话内全部已采纳推荐批量物化为覆配记录
    ///
    /// 尽力而为语义: 单条失败收集上报,不中断整批;
    /// 无已采纳推荐时成功返回 created_count=0。
    pub async fn batch_create_coverages(
        &self,
        simulation_id: &str,
        coverage_date: NaiveDate,
        default_dam_weight: Option<f64>,
        default_body_condition_score: Option<i32>,
    ) -> ApiResult<BatchCoverageResponse> {
        if let Some(score) = default_body_condition_score {
            if !(1..=5).contains(&score) {
                return Err(ApiError::ValidationError(format!(
                    "体况评分必须在 1-5 范围内: {score}"
                )));
            }
        }
        let session = self.simulation_repo.get_session(simulation_id)?;
        let recommendations = self.simulation_repo.list_recommendations(simulation_id)?;

        let materializer = CoverageMaterializer::new(Arc::clone(&self.coverage_repo));
        let outcome = materializer
            .materialize_batch(
                &session.parameters.herd_id,
                &recommendations,
                coverage_date,
                default_dam_weight,
                default_body_condition_score,
            )
            .await;

        let errors: Vec<BatchCoverageItemError> = outcome
            .errors
            .iter()
            .map(|e| BatchCoverageItemError {
                recommendation_id: e.recommendation_id.clone(),
                sire_id: e.sire_id,
                dam_id: e.dam_id,
                reason: e.reason.clone(),
            })
            .collect();
        let message = if errors.is_empty() {
            format!("覆配落库完成,创建 {} 条记录", outcome.created_count)
        } else {
            format!(
                "覆配落库完成,创建 {} 条记录,{} 条失败",
                outcome.created_count,
                errors.len()
            )
        };

        Ok(BatchCoverageResponse {
            simulation_id: simulation_id.to_string(),
            created_count: outcome.created_count,
            errors,
            message,
        })
    }

    // ==========================================
    // 内部工具
    // ==========================================

    fn load_herd(&self, herd_id: &str) -> ApiResult<Vec<Animal>> {
        if herd_id.trim().is_empty() {
            return Err(ApiError::ValidationError("herd_id 不能为空".to_string()));
        }
        let animals = self.animal_repo.list_by_herd(herd_id)?;
        if animals.is_empty() {
            return Err(ApiError::NotFound(format!("群 {herd_id} 不存在或无动物档案")));
        }
        Ok(animals)
    }

    /// 按 id 拉取候选,任何缺失 id 都是 NotFound
    fn load_candidates(&self, ids: &[i64], role: &str) -> ApiResult<Vec<Animal>> {
        if ids.is_empty() {
            return Err(ApiError::ValidationError(format!("{role}列表不能为空")));
        }
        let mut ids: Vec<i64> = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let animals = self.animal_repo.find_by_ids(&ids)?;
        if animals.len() != ids.len() {
            let found: Vec<i64> = animals.iter().map(|a| a.animal_id).collect();
            let missing: Vec<i64> = ids
                .iter()
                .filter(|id| !found.contains(id))
                .copied()
                .collect();
            return Err(ApiError::NotFound(format!(
                "{role}中存在未知动物 id: {missing:?}"
            )));
        }
        Ok(animals)
    }
}
