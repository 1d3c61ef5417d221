// ==========================================
// 种羊选配决策支持系统 - 系谱解析引擎
// ==========================================
// 职责: 亲缘系数 / 近交系数的递归计算
// 红线: 系谱是按约定无环的隐式有向图,环必须显式检测,
//       不得依赖树形假设
// ==========================================
// 公式:
// - f(X,X) = 0.5 × (1 + F(X))
// - f(X,Y) = 0.5 × (f(mother(X),Y) + f(father(X),Y)),未知亲项记 0
// - F(X)   = f(mother(X), father(X)),任一亲未知时为 0
// - 预测后代近交系数 F(子代) = f(sire, dam)
// ==========================================

use crate::domain::animal::Animal;
use crate::engine::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// 亲本链接（母/父,缺失表示未知）
#[derive(Debug, Clone, Copy, Default)]
pub struct ParentLinks {
    pub mother: Option<i64>,
    pub father: Option<i64>,
}

// ==========================================
// PedigreeResolver - 系谱解析器
// ==========================================
// 并发模型: 递归公式是不可变系谱数据上的纯函数,
// 缓存采用 RwLock 读多写少;不同 (X,Y) 对可并发计算,
// 同一对的重复计算是浪费但无害（结果恒等）,
// 因此不用全局互斥锁串行化整个评估阶段
pub struct PedigreeResolver {
    parents: HashMap<i64, ParentLinks>,
    /// 预计算的系谱深度,用于选择展开侧（较深一侧先展开）
    depth_hint: HashMap<i64, u32>,
    /// 对称记忆化缓存,键为 (min(id), max(id))
    cache: RwLock<HashMap<(i64, i64), f64>>,
    max_depth: u32,
}

impl PedigreeResolver {
    /// 从亲本链接表构造
    pub fn new(parents: HashMap<i64, ParentLinks>, max_depth: u32) -> Self {
        let depth_hint = compute_depth_hints(&parents, max_depth);
        Self {
            parents,
            depth_hint,
            cache: RwLock::new(HashMap::new()),
            max_depth,
        }
    }

    /// 从动物档案构造（只取亲本字段）
    pub fn from_animals(animals: &[Animal], max_depth: u32) -> Self {
        let parents = animals
            .iter()
            .map(|a| {
                (
                    a.animal_id,
                    ParentLinks {
                        mother: a.mother_id,
                        father: a.father_id,
                    },
                )
            })
            .collect();
        Self::new(parents, max_depth)
    }

    /// 亲缘系数 f(X,Y)
    pub fn kinship(&self, x: i64, y: i64) -> EngineResult<f64> {
        let mut path = Vec::new();
        self.kinship_inner(x, y, &mut path, 0)
    }

    /// 近交系数 F(X) = f(mother(X), father(X))
    pub fn inbreeding(&self, x: i64) -> EngineResult<f64> {
        let mut path = Vec::new();
        self.inbreeding_inner(x, &mut path, 0)
    }

    /// 是否直接亲子关系（任一方向）
    pub fn is_parent_child(&self, a: i64, b: i64) -> bool {
        let a_has_parent_b = self
            .parents
            .get(&a)
            .map(|l| l.mother == Some(b) || l.father == Some(b))
            .unwrap_or(false);
        let b_has_parent_a = self
            .parents
            .get(&b)
            .map(|l| l.mother == Some(a) || l.father == Some(a))
            .unwrap_or(false);
        a_has_parent_b || b_has_parent_a
    }

    // ==========================================
    // 内部递归
    // ==========================================

    fn kinship_inner(
        &self,
        x: i64,
        y: i64,
        path: &mut Vec<i64>,
        depth: u32,
    ) -> EngineResult<f64> {
        // 深度防线: 超过代数上限按无亲缘处理,保证异常深/环状数据下终止
        if depth > self.max_depth {
            return Ok(0.0);
        }

        let key = canonical_pair(x, y);
        if let Some(v) = self.cache_get(&key) {
            return Ok(v);
        }

        let value = if x == y {
            0.5 * (1.0 + self.inbreeding_inner(x, path, depth)?)
        } else {
            // 展开系谱较深的一侧（标准表格法递归）
            let (expand, other) = if self.depth_of(x) >= self.depth_of(y) {
                (x, y)
            } else {
                (y, x)
            };

            let links = self.parents.get(&expand).copied().unwrap_or_default();
            if links.mother.is_none() && links.father.is_none() {
                // 奠基者: 已知祖先耗尽,视为无亲缘
                0.0
            } else {
                if path.contains(&expand) {
                    return Err(EngineError::PedigreeCycle { animal_id: expand });
                }
                path.push(expand);
                let mut acc = 0.0;
                if let Some(mother) = links.mother {
                    acc += self.kinship_inner(mother, other, path, depth + 1)?;
                }
                if let Some(father) = links.father {
                    acc += self.kinship_inner(father, other, path, depth + 1)?;
                }
                path.pop();
                0.5 * acc
            }
        };

        self.cache_put(key, value);
        Ok(value)
    }

    fn inbreeding_inner(
        &self,
        x: i64,
        path: &mut Vec<i64>,
        depth: u32,
    ) -> EngineResult<f64> {
        let links = self.parents.get(&x).copied().unwrap_or_default();
        match (links.mother, links.father) {
            (Some(mother), Some(father)) => {
                if path.contains(&x) {
                    return Err(EngineError::PedigreeCycle { animal_id: x });
                }
                path.push(x);
                let value = self.kinship_inner(mother, father, path, depth + 1)?;
                path.pop();
                Ok(value)
            }
            // 任一亲本未知 → 近交系数按 0 处理
            _ => Ok(0.0),
        }
    }

    fn depth_of(&self, id: i64) -> u32 {
        self.depth_hint.get(&id).copied().unwrap_or(0)
    }

    fn cache_get(&self, key: &(i64, i64)) -> Option<f64> {
        // 锁中毒只可能来自其他线程 panic;此时退化为直接重算,不放大故障
        self.cache.read().ok()?.get(key).copied()
    }

    fn cache_put(&self, key: (i64, i64), value: f64) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, value);
        }
    }
}

/// 对称键: (min(id), max(id)),对半存储并避免对称关系重复计算
fn canonical_pair(x: i64, y: i64) -> (i64, i64) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// 预计算系谱深度（封顶 cap;环按封顶值处理,由 kinship 递归负责报错）
fn compute_depth_hints(parents: &HashMap<i64, ParentLinks>, cap: u32) -> HashMap<i64, u32> {
    fn depth_of(
        id: i64,
        parents: &HashMap<i64, ParentLinks>,
        memo: &mut HashMap<i64, u32>,
        path: &mut Vec<i64>,
        cap: u32,
    ) -> u32 {
        if let Some(d) = memo.get(&id) {
            return *d;
        }
        if path.contains(&id) || path.len() as u32 >= cap {
            return cap;
        }
        let links = parents.get(&id).copied().unwrap_or_default();
        let depth = match (links.mother, links.father) {
            (None, None) => 0,
            (mother, father) => {
                path.push(id);
                let dm = mother.map(|m| depth_of(m, parents, memo, path, cap)).unwrap_or(0);
                let df = father.map(|f| depth_of(f, parents, memo, path, cap)).unwrap_or(0);
                path.pop();
                dm.max(df).saturating_add(1).min(cap)
            }
        };
        memo.insert(id, depth);
        depth
    }

    let mut memo = HashMap::new();
    for id in parents.keys() {
        let mut path = Vec::new();
        depth_of(*id, parents, &mut memo, &mut path, cap);
    }
    memo
}
