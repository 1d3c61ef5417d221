// ==========================================
// 种羊选配决策支持系统 - 选配模拟仓储
// ==========================================
// 职责: 模拟会话与推荐的持久化 + 推荐状态机落库
// 红线: 状态转换必须走 CAS 更新（WHERE status='PENDING'）,
//       采纳时"每母羊至多一条已采纳"在同一事务内校验
// ==========================================

use crate::domain::mating::{Recommendation, SimulationParameters, SimulationSession};
use crate::domain::types::{RecommendationStatus, SelectionMethod};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

pub struct SimulationRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SimulationRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        let repo = Self { conn };
        // best-effort: do not fail app startup for a missing table; errors will surface when using it.
        if let Err(e) = repo.ensure_table_and_indexes() {
            tracing::warn!("mating_simulation ensure failed: {}", e);
        }
        repo
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn ensure_table_and_indexes(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mating_simulation (
              simulation_id TEXT PRIMARY KEY,
              herd_id TEXT NOT NULL,
              heritability REAL NOT NULL,
              selection_method TEXT NOT NULL
                CHECK(selection_method IN ('individual_massal', 'selection_index')),
              min_age_male_months INTEGER NOT NULL,
              min_age_female_months INTEGER NOT NULL,
              weight_adjustment_days INTEGER NOT NULL,
              max_female_percentage_per_male REAL NOT NULL,
              observations TEXT,
              sire_ids_json TEXT NOT NULL,
              dam_ids_json TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mating_recommendation (
              recommendation_id TEXT PRIMARY KEY,
              simulation_id TEXT NOT NULL REFERENCES mating_simulation(simulation_id),
              sire_id INTEGER NOT NULL,
              dam_id INTEGER NOT NULL,
              predicted_offspring_index REAL NOT NULL,
              predicted_inbreeding REAL NOT NULL,
              predicted_genetic_gain REAL NOT NULL,
              predicted_dep REAL NOT NULL,
              status TEXT NOT NULL CHECK(status IN ('PENDING', 'ADOPTED', 'IGNORED')),
              rank INTEGER NOT NULL,
              adopted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_simulation_herd ON mating_simulation(herd_id);
            CREATE INDEX IF NOT EXISTS idx_recommendation_simulation
              ON mating_recommendation(simulation_id, rank);
            CREATE INDEX IF NOT EXISTS idx_recommendation_dam_status
              ON mating_recommendation(simulation_id, dam_id, status);
            "#,
        )?;
        Ok(())
    }

    pub fn insert_session(&self, session: &SimulationSession) -> RepositoryResult<()> {
        let sire_ids_json = serde_json::to_string(&session.sire_ids)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        let dam_ids_json = serde_json::to_string(&session.dam_ids)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO mating_simulation (
              simulation_id, herd_id, heritability, selection_method,
              min_age_male_months, min_age_female_months,
              weight_adjustment_days, max_female_percentage_per_male,
              observations, sire_ids_json, dam_ids_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                session.simulation_id,
                session.parameters.herd_id,
                session.parameters.heritability,
                session.parameters.selection_method.as_str(),
                session.parameters.min_age_male_months,
                session.parameters.min_age_female_months,
                session.parameters.weight_adjustment_days,
                session.parameters.max_female_percentage_per_male,
                session.parameters.observations,
                sire_ids_json,
                dam_ids_json,
                session.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        )?;
        Ok(())
    }

    /// 整批推荐在单事务内落库（要么全部要么没有）
    pub fn insert_recommendations(
        &self,
        recommendations: &[Recommendation],
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        for rec in recommendations {
            tx.execute(
                r#"
                INSERT INTO mating_recommendation (
                  recommendation_id, simulation_id, sire_id, dam_id,
                  predicted_offspring_index, predicted_inbreeding,
                  predicted_genetic_gain, predicted_dep,
                  status, rank, adopted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)
                "#,
                params![
                    rec.recommendation_id,
                    rec.simulation_id,
                    rec.sire_id,
                    rec.dam_id,
                    rec.predicted_offspring_index,
                    rec.predicted_inbreeding,
                    rec.predicted_genetic_gain,
                    rec.predicted_dep,
                    rec.status.as_str(),
                    rec.rank,
                ],
            )?;
        }
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }

    pub fn get_session(&self, simulation_id: &str) -> RepositoryResult<SimulationSession> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT simulation_id, herd_id, heritability, selection_method,
                   min_age_male_months, min_age_female_months,
                   weight_adjustment_days, max_female_percentage_per_male,
                   observations, sire_ids_json, dam_ids_json, created_at
            FROM mating_simulation
            WHERE simulation_id = ?1
            "#,
        )?;
        let raw = match stmt.query_row(params![simulation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
            ))
        }) {
            Ok(raw) => raw,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(RepositoryError::NotFound {
                    entity: "SimulationSession".to_string(),
                    id: simulation_id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let selection_method = SelectionMethod::parse(&raw.3).ok_or_else(|| {
            RepositoryError::ValidationError(format!("非法选择方法: {}", raw.3))
        })?;
        let sire_ids: Vec<i64> = serde_json::from_str(&raw.9)
            .map_err(|e| RepositoryError::InternalError(format!("sire_ids_json 解析失败: {e}")))?;
        let dam_ids: Vec<i64> = serde_json::from_str(&raw.10)
            .map_err(|e| RepositoryError::InternalError(format!("dam_ids_json 解析失败: {e}")))?;
        let created_at = NaiveDateTime::parse_from_str(&raw.11, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| RepositoryError::InternalError(format!("created_at 解析失败: {e}")))?;

        Ok(SimulationSession {
            simulation_id: raw.0,
            parameters: SimulationParameters {
                herd_id: raw.1,
                heritability: raw.2,
                selection_method,
                min_age_male_months: raw.4,
                min_age_female_months: raw.5,
                weight_adjustment_days: raw.6,
                max_female_percentage_per_male: raw.7,
                observations: raw.8,
            },
            sire_ids,
            dam_ids,
            created_at,
        })
    }

    /// 会话内全部推荐,按排名升序
    pub fn list_recommendations(
        &self,
        simulation_id: &str,
    ) -> RepositoryResult<Vec<Recommendation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{RECOMMENDATION_SELECT} WHERE simulation_id = ?1 ORDER BY rank"
        ))?;
        let rows = stmt
            .query_map(params![simulation_id], map_recommendation)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 会话内已采纳的推荐,按排名升序
    pub fn list_adopted(&self, simulation_id: &str) -> RepositoryResult<Vec<Recommendation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{RECOMMENDATION_SELECT} WHERE simulation_id = ?1 AND status = 'ADOPTED' ORDER BY rank"
        ))?;
        let rows = stmt
            .query_map(params![simulation_id], map_recommendation)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_recommendation(&self, recommendation_id: &str) -> RepositoryResult<Recommendation> {
        let conn = self.get_conn()?;
        Self::get_recommendation_on(&conn, recommendation_id)
    }

    fn get_recommendation_on(
        conn: &Connection,
        recommendation_id: &str,
    ) -> RepositoryResult<Recommendation> {
        let mut stmt = conn.prepare(&format!(
            "{RECOMMENDATION_SELECT} WHERE recommendation_id = ?1"
        ))?;
        match stmt.query_row(params![recommendation_id], map_recommendation) {
            Ok(rec) => Ok(rec),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(RepositoryError::NotFound {
                entity: "Recommendation".to_string(),
                id: recommendation_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// 采纳推荐
    ///
    /// # 规则
    /// - PENDING → ADOPTED,CAS 更新（WHERE status='PENDING'）
    /// - 已是 ADOPTED → 幂等成功,原样返回
    /// - IGNORED → 无效状态转换
    /// - 同会话同母羊已有其他已采纳推荐 → 业务规则违反,同事务内校验
    pub fn adopt(&self, recommendation_id: &str) -> RepositoryResult<Recommendation> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let current = Self::get_recommendation_on(&tx, recommendation_id)?;
        match current.status {
            RecommendationStatus::Adopted => return Ok(current), // 幂等
            RecommendationStatus::Ignored => {
                return Err(RepositoryError::InvalidStateTransition {
                    from: "IGNORED".to_string(),
                    to: "ADOPTED".to_string(),
                })
            }
            RecommendationStatus::Pending => {}
        }

        let adopted_for_dam: i64 = tx.query_row(
            r#"
            SELECT COUNT(*)
            FROM mating_recommendation
            WHERE simulation_id = ?1 AND dam_id = ?2
              AND status = 'ADOPTED' AND recommendation_id != ?3
            "#,
            params![current.simulation_id, current.dam_id, recommendation_id],
            |row| row.get(0),
        )?;
        if adopted_for_dam > 0 {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "母羊 {} 在会话 {} 内已有已采纳的推荐",
                current.dam_id, current.simulation_id
            )));
        }

        let rows = tx.execute(
            r#"
            UPDATE mating_recommendation
            SET status = 'ADOPTED',
                adopted_at = datetime('now', 'localtime')
            WHERE recommendation_id = ?1 AND status = 'PENDING'
            "#,
            params![recommendation_id],
        )?;
        if rows != 1 {
            return Err(RepositoryError::InternalError(format!(
                "采纳 CAS 更新影响 {rows} 行,预期 1 行"
            )));
        }

        let updated = Self::get_recommendation_on(&tx, recommendation_id)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(updated)
    }

    /// 忽略推荐
    ///
    /// # 规则
    /// - PENDING → IGNORED,CAS 更新
    /// - 已是 IGNORED → 幂等成功
    /// - ADOPTED → 无效状态转换（采纳是终态,不可再忽略）
    pub fn ignore(&self, recommendation_id: &str) -> RepositoryResult<Recommendation> {
        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let current = Self::get_recommendation_on(&tx, recommendation_id)?;
        match current.status {
            RecommendationStatus::Ignored => return Ok(current), // 幂等
            RecommendationStatus::Adopted => {
                return Err(RepositoryError::InvalidStateTransition {
                    from: "ADOPTED".to_string(),
                    to: "IGNORED".to_string(),
                })
            }
            RecommendationStatus::Pending => {}
        }

        let rows = tx.execute(
            r#"
            UPDATE mating_recommendation
            SET status = 'IGNORED'
            WHERE recommendation_id = ?1 AND status = 'PENDING'
            "#,
            params![recommendation_id],
        )?;
        if rows != 1 {
            return Err(RepositoryError::InternalError(format!(
                "忽略 CAS 更新影响 {rows} 行,预期 1 行"
            )));
        }

        let updated = Self::get_recommendation_on(&tx, recommendation_id)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(updated)
    }
}

const RECOMMENDATION_SELECT: &str = r#"
    SELECT recommendation_id, simulation_id, sire_id, dam_id,
           predicted_offspring_index, predicted_inbreeding,
           predicted_genetic_gain, predicted_dep,
           status, rank
    FROM mating_recommendation
"#;

fn map_recommendation(row: &Row<'_>) -> SqliteResult<Recommendation> {
    let status_raw: String = row.get(8)?;
    let status = RecommendationStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("非法推荐状态: {status_raw}").into(),
        )
    })?;
    Ok(Recommendation {
        recommendation_id: row.get(0)?,
        simulation_id: row.get(1)?,
        sire_id: row.get(2)?,
        dam_id: row.get(3)?,
        predicted_offspring_index: row.get(4)?,
        predicted_inbreeding: row.get(5)?,
        predicted_genetic_gain: row.get(6)?,
        predicted_dep: row.get(7)?,
        status,
        rank: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;
    use chrono::NaiveDate;

    fn repo() -> SimulationRepository {
        let conn = open_in_memory_connection().unwrap();
        SimulationRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn session(simulation_id: &str) -> SimulationSession {
        SimulationSession {
            simulation_id: simulation_id.to_string(),
            parameters: SimulationParameters {
                herd_id: "H001".to_string(),
                heritability: 0.3,
                selection_method: SelectionMethod::SelectionIndex,
                min_age_male_months: 12,
                min_age_female_months: 10,
                weight_adjustment_days: 60,
                max_female_percentage_per_male: 50.0,
                observations: Some("秋季配种".to_string()),
            },
            sire_ids: vec![1, 2],
            dam_ids: vec![11, 12, 13],
            created_at: NaiveDate::from_ymd_opt(2025, 8, 1)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
        }
    }

    fn recommendation(id: &str, simulation_id: &str, dam_id: i64, rank: i64) -> Recommendation {
        Recommendation {
            recommendation_id: id.to_string(),
            simulation_id: simulation_id.to_string(),
            sire_id: 1,
            dam_id,
            predicted_offspring_index: 0.8,
            predicted_inbreeding: 0.0,
            predicted_genetic_gain: 0.8,
            predicted_dep: 0.2,
            status: RecommendationStatus::Pending,
            rank,
        }
    }

    #[test]
    fn test_session_roundtrip() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();

        let loaded = repo.get_session("sim-1").unwrap();
        assert_eq!(loaded.parameters.herd_id, "H001");
        assert_eq!(loaded.sire_ids, vec![1, 2]);
        assert_eq!(loaded.dam_ids, vec![11, 12, 13]);
        assert_eq!(
            loaded.parameters.selection_method,
            SelectionMethod::SelectionIndex
        );
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let repo = repo();
        assert!(matches!(
            repo.get_session("nope"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_recommendations_listed_by_rank() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();
        repo.insert_recommendations(&[
            recommendation("r2", "sim-1", 12, 2),
            recommendation("r1", "sim-1", 11, 1),
        ])
        .unwrap();

        let listed = repo.list_recommendations("sim-1").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].recommendation_id, "r1");
        assert_eq!(listed[1].recommendation_id, "r2");
    }

    #[test]
    fn test_adopt_is_idempotent() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();
        repo.insert_recommendations(&[recommendation("r1", "sim-1", 11, 1)])
            .unwrap();

        let first = repo.adopt("r1").unwrap();
        assert_eq!(first.status, RecommendationStatus::Adopted);
        // 重复采纳 → 幂等成功
        let second = repo.adopt("r1").unwrap();
        assert_eq!(second.status, RecommendationStatus::Adopted);
    }

    #[test]
    fn test_one_adopted_per_dam_enforced() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();
        // 同一母羊 11 的两条推荐（不同公羊方案）
        repo.insert_recommendations(&[
            recommendation("r1", "sim-1", 11, 1),
            recommendation("r2", "sim-1", 11, 2),
        ])
        .unwrap();

        repo.adopt("r1").unwrap();
        assert!(matches!(
            repo.adopt("r2"),
            Err(RepositoryError::BusinessRuleViolation(_))
        ));
    }

    #[test]
    fn test_ignore_after_adopt_rejected() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();
        repo.insert_recommendations(&[recommendation("r1", "sim-1", 11, 1)])
            .unwrap();

        repo.adopt("r1").unwrap();
        match repo.ignore("r1") {
            Err(RepositoryError::InvalidStateTransition { from, to }) => {
                assert_eq!(from, "ADOPTED");
                assert_eq!(to, "IGNORED");
            }
            other => panic!("expected InvalidStateTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_ignore_is_idempotent_and_adopt_after_ignore_rejected() {
        let repo = repo();
        repo.insert_session(&session("sim-1")).unwrap();
        repo.insert_recommendations(&[recommendation("r1", "sim-1", 11, 1)])
            .unwrap();

        assert_eq!(
            repo.ignore("r1").unwrap().status,
            RecommendationStatus::Ignored
        );
        assert_eq!(
            repo.ignore("r1").unwrap().status,
            RecommendationStatus::Ignored
        );
        assert!(matches!(
            repo.adopt("r1"),
            Err(RepositoryError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_adopt_missing_recommendation_not_found() {
        let repo = repo();
        assert!(matches!(
            repo.adopt("nope"),
            Err(RepositoryError::NotFound { .. })
        ));
    }
}
