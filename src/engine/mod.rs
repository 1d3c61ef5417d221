// ==========================================
// 种羊选配决策支持系统 - 引擎层
// ==========================================
// 纯业务规则引擎,不触数据库:
// - pedigree:     亲缘/近交系数递归解析
// - evaluator:    里程碑体重 → DEP → 选择指数
// - eligibility:  性别与月龄资格筛选
// - allocator:    容量约束下的贪心+交换配对寻优
// - orchestrator: 单次模拟的阶段编排
// - materializer: 已采纳推荐的覆配批量落库
// ==========================================

pub mod allocator;
pub mod eligibility;
pub mod error;
pub mod evaluator;
pub mod materializer;
pub mod orchestrator;
pub mod pedigree;

pub use allocator::{AllocatedPair, AllocationOutcome, MateAllocator};
pub use eligibility::{EligibilityFilter, EligibilityReport};
pub use error::{EngineError, EngineResult};
pub use evaluator::{EvaluationOutcome, GeneticEvaluator};
pub use materializer::{
    BatchCoverageOutcome, CoverageItemError, CoverageMaterializer, CoverageStore,
    DEFAULT_DAM_BODY_CONDITION_SCORE, DEFAULT_DAM_WEIGHT_KG,
};
pub use orchestrator::{SimulationOrchestrator, SimulationRunReport};
pub use pedigree::{ParentLinks, PedigreeResolver};
