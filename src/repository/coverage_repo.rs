// ==========================================
// 种羊选配决策支持系统 - 覆配记录仓储
// ==========================================
// 职责: 繁殖档案库覆配表的写入 + CoverageStore 接口落地
// 约束: 同母羊同公羊同日期的覆配唯一（UNIQUE 约束兜底,
//       重复落库由批处理按单条失败上报）
// ==========================================

use crate::domain::mating::CoverageRequest;
use crate::engine::materializer::CoverageStore;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

/// 产羔状态初值（覆配完成,待确认妊娠/产羔）
const PARTURITION_STATUS_ONGOING: &str = "ONGOING";

/// 已落库的覆配记录
#[derive(Debug, Clone)]
pub struct CoverageEntity {
    pub coverage_id: i64,
    pub herd_id: String,
    pub dam_id: i64,
    pub sire_id: i64,
    pub coverage_date: NaiveDate,
    pub dam_weight_kg: f64,
    pub dam_body_condition_score: i32,
    pub parturition_status: String,
    pub observations: Option<String>,
}

pub struct CoverageRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CoverageRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        let repo = Self { conn };
        // best-effort: do not fail app startup for a missing table; errors will surface when using it.
        if let Err(e) = repo.ensure_table_and_indexes() {
            tracing::warn!("reproductive_coverage ensure failed: {}", e);
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
            CREATE TABLE IF NOT EXISTS reproductive_coverage (
              coverage_id INTEGER PRIMARY KEY AUTOINCREMENT,
              herd_id TEXT NOT NULL,
              dam_id INTEGER NOT NULL,
              sire_id INTEGER NOT NULL,
              coverage_date TEXT NOT NULL,
              dam_weight_kg REAL NOT NULL,
              dam_body_condition_score INTEGER NOT NULL,
              parturition_status TEXT NOT NULL DEFAULT 'ONGOING',
              observations TEXT,
              UNIQUE(dam_id, sire_id, coverage_date)
            );

            CREATE INDEX IF NOT EXISTS idx_coverage_herd ON reproductive_coverage(herd_id);
            CREATE INDEX IF NOT EXISTS idx_coverage_dam ON reproductive_coverage(dam_id);
            "#,
        )?;
        Ok(())
    }

    /// 写入一条覆配记录,返回覆配 id
    pub fn insert_coverage(&self, request: &CoverageRequest) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO reproductive_coverage (
              herd_id, dam_id, sire_id, coverage_date,
              dam_weight_kg, dam_body_condition_score,
              parturition_status, observations
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                request.herd_id,
                request.dam_id,
                request.sire_id,
                request.coverage_date.format("%Y-%m-%d").to_string(),
                request.dam_weight_kg,
                request.dam_body_condition_score,
                PARTURITION_STATUS_ONGOING,
                request.observations,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_by_herd(&self, herd_id: &str) -> RepositoryResult<Vec<CoverageEntity>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT coverage_id, herd_id, dam_id, sire_id, coverage_date,
                   dam_weight_kg, dam_body_condition_score,
                   parturition_status, observations
            FROM reproductive_coverage
            WHERE herd_id = ?1
            ORDER BY coverage_date, coverage_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![herd_id], map_coverage)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}

// CoverageStore 落地: 批处理器通过接口写入,测试可替换为注入失败的替身
#[async_trait]
impl CoverageStore for CoverageRepository {
    async fn create_coverage(&self, request: &CoverageRequest) -> anyhow::Result<i64> {
        match self.insert_coverage(request) {
            Ok(id) => Ok(id),
            Err(RepositoryError::UniqueConstraintViolation(_)) => Err(anyhow::anyhow!(
                "母羊 {} 与公羊 {} 在 {} 已有覆配记录",
                request.dam_id,
                request.sire_id,
                request.coverage_date
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn latest_dam_weight(&self, dam_id: i64) -> anyhow::Result<Option<f64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("数据库锁获取失败: {e}"))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT weight_kg
            FROM weight_records
            WHERE animal_id = ?1
            ORDER BY measurement_date DESC, record_id DESC
            LIMIT 1
            "#,
        )?;
        match stmt.query_row(params![dam_id], |row| row.get::<_, f64>(0)) {
            Ok(w) => Ok(Some(w)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn map_coverage(row: &Row<'_>) -> SqliteResult<CoverageEntity> {
    let date_raw: String = row.get(4)?;
    let coverage_date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(CoverageEntity {
        coverage_id: row.get(0)?,
        herd_id: row.get(1)?,
        dam_id: row.get(2)?,
        sire_id: row.get(3)?,
        coverage_date,
        dam_weight_kg: row.get(5)?,
        dam_body_condition_score: row.get(6)?,
        parturition_status: row.get(7)?,
        observations: row.get(8)?,
    })
}
