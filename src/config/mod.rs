// ==========================================
// 种羊选配决策支持系统 - 配置层
// ==========================================
// 职责: 引擎可调参数的集中定义、默认值与校验
// 说明: 参数随模拟会话快照固化，运行中不热更新
// ==========================================

pub mod engine_params;

// 重导出核心配置类型
pub use engine_params::EngineParams;
