// ==========================================
// 种羊选配决策支持系统 - 动物档案仓储
// ==========================================
// 职责: 动物档案与称重/体型记录的 SQLite 存取
// 红线: 仓储只做存取,不做业务判断;引擎从不直接触 SQL
// ==========================================

use crate::domain::animal::{Animal, PhenotypeRecord};
use crate::domain::types::Sex;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, Result as SqliteResult, Row};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// 系谱闭包向上追溯的代数上限（防畸形数据打穿内存）
const PEDIGREE_CLOSURE_MAX_GENERATIONS: usize = 20;

pub struct AnimalRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AnimalRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        let repo = Self { conn };
        // best-effort: do not fail app startup for a missing table; errors will surface when using it.
        if let Err(e) = repo.ensure_table_and_indexes() {
            tracing::warn!("animals ensure failed: {}", e);
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
            CREATE TABLE IF NOT EXISTS animals (
              animal_id INTEGER PRIMARY KEY,
              herd_id TEXT NOT NULL,
              earring_identification TEXT NOT NULL UNIQUE,
              name TEXT,
              sex TEXT NOT NULL CHECK(sex IN ('M', 'F')),
              birth_date TEXT,
              mother_id INTEGER,
              father_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS weight_records (
              record_id INTEGER PRIMARY KEY AUTOINCREMENT,
              animal_id INTEGER NOT NULL REFERENCES animals(animal_id),
              measurement_date TEXT NOT NULL,
              weight_kg REAL NOT NULL,
              body_condition_score INTEGER,
              conformation INTEGER,
              precocity INTEGER,
              musculature INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_animals_herd ON animals(herd_id);
            CREATE INDEX IF NOT EXISTS idx_animals_mother ON animals(mother_id);
            CREATE INDEX IF NOT EXISTS idx_animals_father ON animals(father_id);
            CREATE INDEX IF NOT EXISTS idx_weight_records_animal
              ON weight_records(animal_id, measurement_date);
            "#,
        )?;
        Ok(())
    }

    pub fn insert_animal(&self, animal: &Animal) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO animals (
              animal_id, herd_id, earring_identification, name,
              sex, birth_date, mother_id, father_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                animal.animal_id,
                animal.herd_id,
                animal.earring_identification,
                animal.name,
                animal.sex.as_str(),
                animal.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
                animal.mother_id,
                animal.father_id,
            ],
        )?;
        Ok(())
    }

    /// 写入一条称重/体型记录,返回记录 id
    pub fn insert_phenotype_record(&self, record: &PhenotypeRecord) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO weight_records (
              animal_id, measurement_date, weight_kg,
              body_condition_score, conformation, precocity, musculature
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.animal_id,
                record.measurement_date.format("%Y-%m-%d").to_string(),
                record.weight_kg,
                record.body_condition_score,
                record.conformation,
                record.precocity,
                record.musculature,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, animal_id: i64) -> RepositoryResult<Animal> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT animal_id, herd_id, earring_identification, name,
                   sex, birth_date, mother_id, father_id
            FROM animals
            WHERE animal_id = ?1
            "#,
        )?;
        match stmt.query_row(params![animal_id], map_animal) {
            Ok(animal) => Ok(animal),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(RepositoryError::NotFound {
                entity: "Animal".to_string(),
                id: animal_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_by_herd(&self, herd_id: &str) -> RepositoryResult<Vec<Animal>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT animal_id, herd_id, earring_identification, name,
                   sex, birth_date, mother_id, father_id
            FROM animals
            WHERE herd_id = ?1
            ORDER BY animal_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![herd_id], map_animal)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn find_by_ids(&self, animal_ids: &[i64]) -> RepositoryResult<Vec<Animal>> {
        if animal_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let placeholders = placeholders_for(animal_ids.len());
        let sql = format!(
            r#"
            SELECT animal_id, herd_id, earring_identification, name,
                   sex, birth_date, mother_id, father_id
            FROM animals
            WHERE animal_id IN ({placeholders})
            ORDER BY animal_id
            "#,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(animal_ids.iter()), map_animal)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// 从种子动物出发逐代向上拉取祖先,返回闭包内全部档案
    ///
    /// # 规则
    /// - 逐代 BFS,最多追溯 20 代（畸形系谱防线）
    /// - 档案库中不存在的祖先 id 静默跳过（按奠基者处理）
    pub fn load_pedigree_closure(&self, seed_ids: &[i64]) -> RepositoryResult<Vec<Animal>> {
        let mut seen: HashSet<i64> = HashSet::new();
        let mut closure: Vec<Animal> = Vec::new();
        let mut frontier: Vec<i64> = seed_ids.to_vec();

        for _ in 0..=PEDIGREE_CLOSURE_MAX_GENERATIONS {
            frontier.retain(|id| seen.insert(*id));
            if frontier.is_empty() {
                break;
            }
            let batch = self.find_by_ids(&frontier)?;
            frontier = batch
                .iter()
                .flat_map(|a| [a.mother_id, a.father_id])
                .flatten()
                .filter(|id| !seen.contains(id))
                .collect();
            closure.extend(batch);
        }
        Ok(closure)
    }

    /// 按动物分组拉取称重/体型记录（组内按测量日期升序）
    pub fn records_for_animals(
        &self,
        animal_ids: &[i64],
    ) -> RepositoryResult<HashMap<i64, Vec<PhenotypeRecord>>> {
        if animal_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.get_conn()?;
        let placeholders = placeholders_for(animal_ids.len());
        let sql = format!(
            r#"
            SELECT animal_id, measurement_date, weight_kg,
                   body_condition_score, conformation, precocity, musculature
            FROM weight_records
            WHERE animal_id IN ({placeholders})
            ORDER BY animal_id, measurement_date
            "#,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(animal_ids.iter()), map_record)?
            .collect::<SqliteResult<Vec<_>>>()?;

        let mut grouped: HashMap<i64, Vec<PhenotypeRecord>> = HashMap::new();
        for record in rows {
            grouped.entry(record.animal_id).or_default().push(record);
        }
        Ok(grouped)
    }

    /// 最近一次称重体重（无记录返回 None）
    pub fn latest_weight(&self, animal_id: i64) -> RepositoryResult<Option<f64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT weight_kg
            FROM weight_records
            WHERE animal_id = ?1
            ORDER BY measurement_date DESC, record_id DESC
            LIMIT 1
            "#,
        )?;
        match stmt.query_row(params![animal_id], |row| row.get::<_, f64>(0)) {
            Ok(w) => Ok(Some(w)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn placeholders_for(count: usize) -> String {
    let mut s = "?,".repeat(count);
    s.pop();
    s
}

fn map_animal(row: &Row<'_>) -> SqliteResult<Animal> {
    let sex_raw: String = row.get(4)?;
    let sex = Sex::parse(&sex_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("非法性别码: {sex_raw}").into(),
        )
    })?;
    let birth_raw: Option<String> = row.get(5)?;
    let birth_date = match birth_raw {
        Some(s) => Some(parse_date(&s, 5)?),
        None => None,
    };
    Ok(Animal {
        animal_id: row.get(0)?,
        herd_id: row.get(1)?,
        earring_identification: row.get(2)?,
        name: row.get(3)?,
        sex,
        birth_date,
        mother_id: row.get(6)?,
        father_id: row.get(7)?,
    })
}

fn map_record(row: &Row<'_>) -> SqliteResult<PhenotypeRecord> {
    let date_raw: String = row.get(1)?;
    Ok(PhenotypeRecord {
        animal_id: row.get(0)?,
        measurement_date: parse_date(&date_raw, 1)?,
        weight_kg: row.get(2)?,
        body_condition_score: row.get(3)?,
        conformation: row.get(4)?,
        precocity: row.get(5)?,
        musculature: row.get(6)?,
    })
}

fn parse_date(raw: &str, column: usize) -> SqliteResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}
