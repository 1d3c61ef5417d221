// ==========================================
// 种羊选配决策支持系统 - 仓储层
// ==========================================
// 统一约定: Arc<Mutex<Connection>> 共享连接,
// 建表走 ensure_table_and_indexes,SQL 一律参数化
// ==========================================

pub mod animal_repo;
pub mod coverage_repo;
pub mod error;
pub mod simulation_repo;

pub use animal_repo::AnimalRepository;
pub use coverage_repo::{CoverageEntity, CoverageRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use simulation_repo::SimulationRepository;
