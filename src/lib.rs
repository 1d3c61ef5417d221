// ==========================================
// 种羊选配决策支持系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 育种决策支持 (推荐供人工采纳,引擎不自动配种)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 引擎参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{RecommendationStatus, SelectionMethod, Sex};

// 领域实体
pub use domain::{
    Animal, CoverageRequest, GeneticMeritEstimate, PhenotypeRecord, Recommendation,
    SimulationParameters, SimulationSession,
};

// 引擎
pub use engine::{
    CoverageMaterializer, CoverageStore, EligibilityFilter, GeneticEvaluator, MateAllocator,
    PedigreeResolver, SimulationOrchestrator,
};

// 配置
pub use config::EngineParams;

// API
pub use api::{ApiError, ApiResult, MatingApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "种羊选配决策支持系统";

// ==========================================
// 预编译检查
// ==========================================
