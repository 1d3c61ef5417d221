// ==========================================
// 种羊选配决策支持系统 - 覆配落库器
// ==========================================
// 职责: 将已采纳的推荐批量物化为覆配记录
// 语义: 尽力而为批处理 —— 单条失败收集上报,批次继续,
//       绝不静默吞错,也绝不因单条失败中断整批
// ==========================================

use crate::domain::mating::{CoverageRequest, Recommendation};
use crate::domain::types::RecommendationStatus;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// 母羊体重无记录且未给默认值时的兜底体重（kg）
pub const DEFAULT_DAM_WEIGHT_KG: f64 = 50.0;
/// 体况评分兜底值（1-5 的中位）
pub const DEFAULT_DAM_BODY_CONDITION_SCORE: i32 = 3;

// ==========================================
// CoverageStore - 覆配存储接口
// ==========================================
// 接口化的意义: 落库目标是外部繁殖档案库,测试中可注入失败

#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// 创建一条覆配记录,返回记录 id
    async fn create_coverage(&self, request: &CoverageRequest) -> anyhow::Result<i64>;

    /// 母羊最近一次称重（无记录返回 None）
    async fn latest_dam_weight(&self, dam_id: i64) -> anyhow::Result<Option<f64>>;
}

/// 单条物化失败明细
#[derive(Debug, Clone)]
pub struct CoverageItemError {
    pub recommendation_id: String,
    pub sire_id: i64,
    pub dam_id: i64,
    pub reason: String,
}

/// 批量物化结果
#[derive(Debug, Clone, Default)]
pub struct BatchCoverageOutcome {
    pub created_count: usize,
    pub errors: Vec<CoverageItemError>,
}

// ==========================================
// CoverageMaterializer - 覆配落库器
// ==========================================

pub struct CoverageMaterializer<S: CoverageStore> {
    store: Arc<S>,
}

impl<S: CoverageStore> CoverageMaterializer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 批量物化已采纳的推荐
    ///
    /// # 规则
    /// - 仅处理 ADOPTED 状态的推荐,其余状态直接跳过
    /// - 母羊体重: 最近称重 → 调用方默认值 → 兜底常量;
    ///   称重查询失败按兜底处理并告警,不计入失败
    /// - 写入并发发起,结果按输入顺序聚合
    pub async fn materialize_batch(
        &self,
        herd_id: &str,
        recommendations: &[Recommendation],
        coverage_date: NaiveDate,
        default_dam_weight: Option<f64>,
        default_body_condition_score: Option<i32>,
    ) -> BatchCoverageOutcome {
        let adopted: Vec<&Recommendation> = recommendations
            .iter()
            .filter(|r| r.status == RecommendationStatus::Adopted)
            .collect();
        info!(
            total = recommendations.len(),
            adopted = adopted.len(),
            coverage_date = %coverage_date,
            "覆配批量物化启动"
        );

        let fallback_weight = default_dam_weight.unwrap_or(DEFAULT_DAM_WEIGHT_KG);
        let body_condition_score =
            default_body_condition_score.unwrap_or(DEFAULT_DAM_BODY_CONDITION_SCORE);

        let tasks = adopted.iter().map(|rec| {
            let store = Arc::clone(&self.store);
            let herd_id = herd_id.to_string();
            async move {
                let dam_weight = match store.latest_dam_weight(rec.dam_id).await {
                    Ok(Some(w)) => w,
                    Ok(None) => fallback_weight,
                    Err(e) => {
                        warn!(dam_id = rec.dam_id, error = %e, "母羊称重查询失败,按兜底体重落库");
                        fallback_weight
                    }
                };
                let request = CoverageRequest {
                    herd_id,
                    dam_id: rec.dam_id,
                    sire_id: rec.sire_id,
                    coverage_date,
                    dam_weight_kg: dam_weight,
                    dam_body_condition_score: body_condition_score,
                    observations: Some(format!("选配推荐 {}", rec.recommendation_id)),
                };
                store
                    .create_coverage(&request)
                    .await
                    .map(|_| ())
                    .map_err(|e| CoverageItemError {
                        recommendation_id: rec.recommendation_id.clone(),
                        sire_id: rec.sire_id,
                        dam_id: rec.dam_id,
                        reason: e.to_string(),
                    })
            }
        });

        let mut outcome = BatchCoverageOutcome::default();
        for result in join_all(tasks).await {
            match result {
                Ok(()) => outcome.created_count += 1,
                Err(item) => {
                    warn!(
                        recommendation_id = %item.recommendation_id,
                        sire_id = item.sire_id,
                        dam_id = item.dam_id,
                        reason = %item.reason,
                        "覆配记录创建失败"
                    );
                    outcome.errors.push(item);
                }
            }
        }

        info!(
            created = outcome.created_count,
            failed = outcome.errors.len(),
            "覆配批量物化完成"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    /// 测试替身: 指定母羊必失败,其余记账成功
    struct StubStore {
        fail_dam_id: Option<i64>,
        weight_of: Option<f64>,
        created: Mutex<Vec<CoverageRequest>>,
    }

    impl StubStore {
        fn new(fail_dam_id: Option<i64>, weight_of: Option<f64>) -> Self {
            Self {
                fail_dam_id,
                weight_of,
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CoverageStore for StubStore {
        async fn create_coverage(&self, request: &CoverageRequest) -> anyhow::Result<i64> {
            if self.fail_dam_id == Some(request.dam_id) {
                return Err(anyhow!("UNIQUE 约束冲突: 同日同对覆配已存在"));
            }
            let mut created = self.created.lock().unwrap();
            created.push(request.clone());
            Ok(created.len() as i64)
        }

        async fn latest_dam_weight(&self, _dam_id: i64) -> anyhow::Result<Option<f64>> {
            Ok(self.weight_of)
        }
    }

    fn recommendation(id: &str, sire_id: i64, dam_id: i64, status: RecommendationStatus) -> Recommendation {
        Recommendation {
            recommendation_id: id.to_string(),
            simulation_id: "sim-1".to_string(),
            sire_id,
            dam_id,
            predicted_offspring_index: 0.5,
            predicted_inbreeding: 0.0,
            predicted_genetic_gain: 0.5,
            predicted_dep: 0.1,
            status,
            rank: 1,
        }
    }

    fn coverage_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    #[tokio::test]
    async fn test_batch_continues_past_single_failure() {
        // 3 条已采纳,第 2 条落库失败 → 第 1/3 条创建成功,恰好 1 条错误
        let store = Arc::new(StubStore::new(Some(12), Some(45.0)));
        let materializer = CoverageMaterializer::new(Arc::clone(&store));
        let recs = vec![
            recommendation("r1", 1, 11, RecommendationStatus::Adopted),
            recommendation("r2", 1, 12, RecommendationStatus::Adopted),
            recommendation("r3", 2, 13, RecommendationStatus::Adopted),
        ];

        let outcome = materializer
            .materialize_batch("H001", &recs, coverage_date(), None, None)
            .await;

        assert_eq!(outcome.created_count, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].recommendation_id, "r2");
        assert_eq!(outcome.errors[0].dam_id, 12);

        let created = store.created.lock().unwrap();
        let dams: Vec<i64> = created.iter().map(|c| c.dam_id).collect();
        assert!(dams.contains(&11));
        assert!(dams.contains(&13));
    }

    #[tokio::test]
    async fn test_only_adopted_materialized() {
        let store = Arc::new(StubStore::new(None, Some(45.0)));
        let materializer = CoverageMaterializer::new(Arc::clone(&store));
        let recs = vec![
            recommendation("r1", 1, 11, RecommendationStatus::Adopted),
            recommendation("r2", 1, 12, RecommendationStatus::Pending),
            recommendation("r3", 2, 13, RecommendationStatus::Ignored),
        ];

        let outcome = materializer
            .materialize_batch("H001", &recs, coverage_date(), None, None)
            .await;

        assert_eq!(outcome.created_count, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(store.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dam_weight_from_latest_record_else_default() {
        // 有最近称重 → 用称重值
        let store = Arc::new(StubStore::new(None, Some(47.5)));
        let materializer = CoverageMaterializer::new(Arc::clone(&store));
        let recs = vec![recommendation("r1", 1, 11, RecommendationStatus::Adopted)];
        materializer
            .materialize_batch("H001", &recs, coverage_date(), Some(40.0), Some(4))
            .await;
        {
            let created = store.created.lock().unwrap();
            assert!((created[0].dam_weight_kg - 47.5).abs() < 1e-9);
            assert_eq!(created[0].dam_body_condition_score, 4);
        }

        // 无称重且无调用方默认值 → 兜底常量
        let store = Arc::new(StubStore::new(None, None));
        let materializer = CoverageMaterializer::new(Arc::clone(&store));
        materializer
            .materialize_batch("H001", &recs, coverage_date(), None, None)
            .await;
        let created = store.created.lock().unwrap();
        assert!((created[0].dam_weight_kg - DEFAULT_DAM_WEIGHT_KG).abs() < 1e-9);
        assert_eq!(
            created[0].dam_body_condition_score,
            DEFAULT_DAM_BODY_CONDITION_SCORE
        );
    }

    #[tokio::test]
    async fn test_empty_adopted_set_is_ok() {
        let store = Arc::new(StubStore::new(None, None));
        let materializer = CoverageMaterializer::new(store);
        let recs = vec![recommendation("r1", 1, 11, RecommendationStatus::Pending)];
        let outcome = materializer
            .materialize_batch("H001", &recs, coverage_date(), None, None)
            .await;
        assert_eq!(outcome.created_count, 0);
        assert!(outcome.errors.is_empty());
    }
}
