// ==========================================
// 种羊选配决策支持系统 - 配对分配引擎
// ==========================================
// 职责: 容量约束下的公母配对寻优
// 策略: 贪心按边得分分配 + 成对交换改进（文档化的近似策略,
//       不是全局最优求解;交换循环至无改进为止）
// 红线: 禁配对（同体/亲子）从候选边生成阶段就剔除,
//       任何后续步骤都不可能产出禁配对
// ==========================================
// 评分: score(s,d) = 0.5 × (index(s) + index(d)) − penalty × kinship(s,d)
// 容量: cap = ceil(pct / 100 × |dams|),对每只公羊统一
// 并列: 得分降序 → 预测近交升序 → 公羊 id 升序 → 母羊 id 升序
// ==========================================

use crate::domain::animal::Animal;
use crate::domain::genetics::GeneticMeritEstimate;
use crate::domain::mating::capacity_per_sire;
use crate::engine::error::EngineError;
use crate::engine::pedigree::PedigreeResolver;
use std::collections::HashMap;
use tracing::{debug, warn};

const SCORE_EPS: f64 = 1e-9;

/// 一条配对建议（未落库形态）
#[derive(Debug, Clone, Copy)]
pub struct AllocatedPair {
    pub sire_id: i64,
    pub dam_id: i64,
    /// 配对目标函数得分（= 预测遗传增益,排序依据）
    pub score: f64,
    /// 预测后代选择指数 = 0.5 × (index(s) + index(d))
    pub predicted_offspring_index: f64,
    /// 预测后代近交系数 = kinship(s, d)
    pub predicted_inbreeding: f64,
    /// 预测 DEP = 0.5 × (dep(s) + dep(d))
    pub predicted_dep: f64,
}

/// 分配结果
#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    /// 最终配对,按并列规则排好序
    pub pairs: Vec<AllocatedPair>,
    /// 未获配对的母羊（容量不足或无合法配对）
    pub unpaired_dam_ids: Vec<i64>,
    pub capacity_per_sire: i64,
    /// Σ容量 < |dams|,部分母羊注定无配对
    pub capacity_shortfall: bool,
    /// 因系谱环被跳过的 (sire_id, dam_id) 对
    pub cycle_flagged_pairs: Vec<(i64, i64)>,
}

// ==========================================
// MateAllocator - 配对分配器
// ==========================================

pub struct MateAllocator {
    inbreeding_penalty: f64,
}

impl MateAllocator {
    pub fn new(inbreeding_penalty: f64) -> Self {
        Self { inbreeding_penalty }
    }

    /// 执行配对分配
    ///
    /// # 规则
    /// - 候选任一侧为空 → 空结果（由调用方给出原因,不是错误）
    /// - 无选择指数的动物按指数 0 参与（仍可被配对）
    /// - kinship 计算命中系谱环 → 该对跳过并记录,分配继续
    pub fn allocate(
        &self,
        sires: &[Animal],
        dams: &[Animal],
        estimates: &HashMap<i64, GeneticMeritEstimate>,
        resolver: &PedigreeResolver,
        max_female_percentage_per_male: f64,
    ) -> AllocationOutcome {
        if sires.is_empty() || dams.is_empty() {
            return AllocationOutcome {
                unpaired_dam_ids: sorted_ids(dams),
                capacity_shortfall: !dams.is_empty(),
                ..AllocationOutcome::default()
            };
        }

        let cap = capacity_per_sire(max_female_percentage_per_male, dams.len());
        let capacity_shortfall = cap * (sires.len() as i64) < dams.len() as i64;

        // id 升序遍历,保证同参数重跑产出完全一致
        let sire_ids = sorted_ids(sires);
        let dam_ids = sorted_ids(dams);

        // ===== 步骤 1: 生成合法候选边 =====
        let mut edges: Vec<AllocatedPair> = Vec::with_capacity(sire_ids.len() * dam_ids.len());
        let mut cycle_flagged_pairs = Vec::new();
        for &sire_id in &sire_ids {
            for &dam_id in &dam_ids {
                // 禁配: 同一个体 / 直接亲子
                if sire_id == dam_id || resolver.is_parent_child(sire_id, dam_id) {
                    continue;
                }
                let kinship = match resolver.kinship(sire_id, dam_id) {
                    Ok(k) => k,
                    Err(EngineError::PedigreeCycle { animal_id }) => {
                        warn!(sire_id, dam_id, cycle_at = animal_id, "系谱环: 该配对跳过");
                        cycle_flagged_pairs.push((sire_id, dam_id));
                        continue;
                    }
                    Err(e) => {
                        warn!(sire_id, dam_id, error = %e, "亲缘系数计算失败: 该配对跳过");
                        cycle_flagged_pairs.push((sire_id, dam_id));
                        continue;
                    }
                };

                let offspring_index =
                    0.5 * (index_of(estimates, sire_id) + index_of(estimates, dam_id));
                let dep = 0.5 * (dep_of(estimates, sire_id) + dep_of(estimates, dam_id));
                edges.push(AllocatedPair {
                    sire_id,
                    dam_id,
                    score: offspring_index - self.inbreeding_penalty * kinship,
                    predicted_offspring_index: offspring_index,
                    predicted_inbreeding: kinship,
                    predicted_dep: dep,
                });
            }
        }
        sort_pairs(&mut edges);

        // ===== 步骤 2: 贪心分配 =====
        let mut sire_load: HashMap<i64, i64> = sire_ids.iter().map(|id| (*id, 0)).collect();
        let mut dam_assigned: HashMap<i64, usize> = HashMap::new(); // dam_id -> chosen 下标
        let mut chosen: Vec<AllocatedPair> = Vec::new();
        for edge in &edges {
            if dam_assigned.contains_key(&edge.dam_id) {
                continue;
            }
            let load = sire_load.entry(edge.sire_id).or_insert(0);
            if *load >= cap {
                continue;
            }
            *load += 1;
            dam_assigned.insert(edge.dam_id, chosen.len());
            chosen.push(*edge);
        }

        // ===== 步骤 3: 成对交换改进 =====
        let edge_lookup: HashMap<(i64, i64), AllocatedPair> = edges
            .iter()
            .map(|e| ((e.sire_id, e.dam_id), *e))
            .collect();
        self.improve_by_exchange(&mut chosen, &edge_lookup);

        // ===== 步骤 4: 排序与汇总 =====
        sort_pairs(&mut chosen);
        let unpaired_dam_ids: Vec<i64> = dam_ids
            .iter()
            .filter(|id| !dam_assigned.contains_key(id))
            .copied()
            .collect();

        debug!(
            sires = sire_ids.len(),
            dams = dam_ids.len(),
            cap,
            pairs = chosen.len(),
            unpaired = unpaired_dam_ids.len(),
            capacity_shortfall,
            "配对分配完成"
        );

        AllocationOutcome {
            pairs: chosen,
            unpaired_dam_ids,
            capacity_per_sire: cap,
            capacity_shortfall,
            cycle_flagged_pairs,
        }
    }

    /// 成对交换改进: 任意两条配对互换母羊能抬高总分就换,
    /// 循环至一轮扫描无任何改进
    fn improve_by_exchange(
        &self,
        chosen: &mut [AllocatedPair],
        edge_lookup: &HashMap<(i64, i64), AllocatedPair>,
    ) {
        loop {
            let mut improved = false;
            for i in 0..chosen.len() {
                for j in (i + 1)..chosen.len() {
                    if chosen[i].sire_id == chosen[j].sire_id {
                        continue;
                    }
                    // 互换后的两条边必须都是合法候选边（禁配/环已在生成期剔除）
                    let swapped_i = edge_lookup.get(&(chosen[i].sire_id, chosen[j].dam_id));
                    let swapped_j = edge_lookup.get(&(chosen[j].sire_id, chosen[i].dam_id));
                    if let (Some(a), Some(b)) = (swapped_i, swapped_j) {
                        let current = chosen[i].score + chosen[j].score;
                        if a.score + b.score > current + SCORE_EPS {
                            chosen[i] = *a;
                            chosen[j] = *b;
                            improved = true;
                        }
                    }
                }
            }
            if !improved {
                break;
            }
        }
    }
}

/// 并列规则: 得分降序 → 预测近交升序 → 公羊 id 升序 → 母羊 id 升序
fn sort_pairs(pairs: &mut [AllocatedPair]) {
    pairs.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.predicted_inbreeding.total_cmp(&b.predicted_inbreeding))
            .then(a.sire_id.cmp(&b.sire_id))
            .then(a.dam_id.cmp(&b.dam_id))
    });
}

fn sorted_ids(animals: &[Animal]) -> Vec<i64> {
    let mut ids: Vec<i64> = animals.iter().map(|a| a.animal_id).collect();
    ids.sort_unstable();
    ids
}

/// 无估计或无指数的动物按 0 参与排名
fn index_of(estimates: &HashMap<i64, GeneticMeritEstimate>, id: i64) -> f64 {
    estimates
        .get(&id)
        .and_then(|e| e.selection_index)
        .unwrap_or(0.0)
}

fn dep_of(estimates: &HashMap<i64, GeneticMeritEstimate>, id: i64) -> f64 {
    estimates.get(&id).and_then(|e| e.dep).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Sex;
    use chrono::NaiveDate;

    const EPS: f64 = 1e-9;

    fn animal(
        id: i64,
        sex: Sex,
        mother_id: Option<i64>,
        father_id: Option<i64>,
    ) -> Animal {
        Animal {
            animal_id: id,
            herd_id: "H001".to_string(),
            earring_identification: format!("BR-{id:04}"),
            name: None,
            sex,
            birth_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            mother_id,
            father_id,
        }
    }

    fn estimate(id: i64, index: f64) -> GeneticMeritEstimate {
        GeneticMeritEstimate {
            animal_id: id,
            adjusted_weight_kg: None,
            weight_deviation_kg: None,
            dep: Some(index * 0.1),
            selection_index: Some(index),
            inbreeding_coefficient: 0.0,
        }
    }

    fn estimates_of(entries: &[(i64, f64)]) -> HashMap<i64, GeneticMeritEstimate> {
        entries.iter().map(|(id, v)| (*id, estimate(*id, *v))).collect()
    }

    // ==========================================
    // 评分与排序
    // ==========================================

    #[test]
    fn test_score_penalizes_kinship() {
        // S(指数 2.0) 配 D1(无亲缘) 得 1.0;配 D2(全同胞,kinship 0.25)
        // 罚系数 1.0 时得 0.5×2.0 − 0.25 = 0.75 → D1 排前
        let founder_m = animal(100, Sex::Female, None, None);
        let founder_f = animal(101, Sex::Male, None, None);
        let sire = animal(1, Sex::Male, Some(100), Some(101));
        let dam_unrelated = animal(2, Sex::Female, None, None);
        let dam_full_sib = animal(3, Sex::Female, Some(100), Some(101));
        let pedigree = vec![
            founder_m,
            founder_f,
            sire.clone(),
            dam_unrelated.clone(),
            dam_full_sib.clone(),
        ];
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        let estimates = estimates_of(&[(1, 2.0), (2, 0.0), (3, 0.0)]);

        let allocator = MateAllocator::new(1.0);
        let outcome = allocator.allocate(
            &[sire],
            &[dam_unrelated, dam_full_sib],
            &estimates,
            &resolver,
            100.0,
        );

        assert_eq!(outcome.pairs.len(), 2);
        assert_eq!(outcome.pairs[0].dam_id, 2);
        assert!((outcome.pairs[0].score - 1.0).abs() < EPS);
        assert_eq!(outcome.pairs[1].dam_id, 3);
        assert!((outcome.pairs[1].score - 0.75).abs() < EPS);
        assert!((outcome.pairs[1].predicted_inbreeding - 0.25).abs() < EPS);
    }

    #[test]
    fn test_tie_break_is_deterministic() {
        // 两只公羊指数相同 → 得分并列,公羊 id 升序定胜负
        let s1 = animal(10, Sex::Male, None, None);
        let s2 = animal(11, Sex::Male, None, None);
        let d1 = animal(20, Sex::Female, None, None);
        let d2 = animal(21, Sex::Female, None, None);
        let pedigree = vec![s1.clone(), s2.clone(), d1.clone(), d2.clone()];
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        let estimates = estimates_of(&[(10, 1.0), (11, 1.0), (20, 0.0), (21, 0.0)]);

        let allocator = MateAllocator::new(4.0);
        let run = || {
            allocator.allocate(
                &[s1.clone(), s2.clone()],
                &[d1.clone(), d2.clone()],
                &estimates,
                &resolver,
                50.0,
            )
        };
        let first = run();
        assert_eq!(first.pairs.len(), 2);
        assert_eq!(
            (first.pairs[0].sire_id, first.pairs[0].dam_id),
            (10, 20)
        );
        assert_eq!(
            (first.pairs[1].sire_id, first.pairs[1].dam_id),
            (11, 21)
        );

        // 重跑结果逐条一致
        let second = run();
        let key = |o: &AllocationOutcome| {
            o.pairs
                .iter()
                .map(|p| (p.sire_id, p.dam_id))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&first), key(&second));
    }

    // ==========================================
    // 容量约束
    // ==========================================

    #[test]
    fn test_capacity_cap_and_shortfall() {
        // 1 公 10 母,50% → 恰好 5 条配对,5 只母羊无配对,容量缺口上报
        let sire = animal(1, Sex::Male, None, None);
        let dams: Vec<Animal> =
            (10..20).map(|id| animal(id, Sex::Female, None, None)).collect();
        let mut pedigree = vec![sire.clone()];
        pedigree.extend(dams.iter().cloned());
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        let estimates = estimates_of(&[(1, 1.0)]);

        let allocator = MateAllocator::new(4.0);
        let outcome = allocator.allocate(&[sire], &dams, &estimates, &resolver, 50.0);

        assert_eq!(outcome.capacity_per_sire, 5);
        assert_eq!(outcome.pairs.len(), 5);
        assert_eq!(outcome.unpaired_dam_ids.len(), 5);
        assert!(outcome.capacity_shortfall);
        // 并列时母羊 id 升序中签,未中签为后 5 个 id
        assert_eq!(outcome.unpaired_dam_ids, vec![15, 16, 17, 18, 19]);
    }

    // ==========================================
    // 禁配对
    // ==========================================

    #[test]
    fn test_parent_offspring_never_paired() {
        // 母羊 2 是公羊 1 的女儿 → 唯一候选边被禁,母羊无配对
        let sire = animal(1, Sex::Male, None, None);
        let daughter = animal(2, Sex::Female, None, Some(1));
        let pedigree = vec![sire.clone(), daughter.clone()];
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        let estimates = estimates_of(&[(1, 1.0), (2, 1.0)]);

        let allocator = MateAllocator::new(4.0);
        let outcome = allocator.allocate(&[sire], &[daughter], &estimates, &resolver, 100.0);

        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.unpaired_dam_ids, vec![2]);
    }

    // ==========================================
    // 交换改进
    // ==========================================

    #[test]
    fn test_exchange_improves_greedy_allocation() {
        // s1/s2 容量各 1;s2 与 d2 为半同胞(kinship 0.125,罚 4.0 → −0.5)
        // 贪心先拿 (s1,d1)=2.0,被迫 (s2,d2)=−0.5,总分 1.5
        // 交换后 (s1,d2)+(s2,d1) = 1.0+1.0 = 2.0 → 必须换
        let shared_father = animal(100, Sex::Male, None, None);
        let s1 = animal(1, Sex::Male, None, None);
        let s2 = animal(2, Sex::Male, None, Some(100));
        let d1 = animal(11, Sex::Female, None, None);
        let d2 = animal(12, Sex::Female, None, Some(100));
        let pedigree = vec![shared_father, s1.clone(), s2.clone(), d1.clone(), d2.clone()];
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        let estimates = estimates_of(&[(1, 2.0), (2, 0.0), (11, 2.0), (12, 0.0)]);

        let allocator = MateAllocator::new(4.0);
        let outcome = allocator.allocate(
            &[s1, s2],
            &[d1, d2],
            &estimates,
            &resolver,
            50.0,
        );

        assert_eq!(outcome.pairs.len(), 2);
        let assignment: Vec<(i64, i64)> =
            outcome.pairs.iter().map(|p| (p.sire_id, p.dam_id)).collect();
        assert!(assignment.contains(&(1, 12)));
        assert!(assignment.contains(&(2, 11)));
    }

    // ==========================================
    // 空候选与缺失指数
    // ==========================================

    #[test]
    fn test_empty_side_yields_empty_outcome() {
        let dam = animal(2, Sex::Female, None, None);
        let resolver = PedigreeResolver::from_animals(&[dam.clone()], 10);
        let estimates = HashMap::new();

        let allocator = MateAllocator::new(4.0);
        let outcome = allocator.allocate(&[], &[dam], &estimates, &resolver, 50.0);
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.unpaired_dam_ids, vec![2]);
    }

    #[test]
    fn test_missing_index_treated_as_zero() {
        let sire = animal(1, Sex::Male, None, None);
        let dam = animal(2, Sex::Female, None, None);
        let pedigree = vec![sire.clone(), dam.clone()];
        let resolver = PedigreeResolver::from_animals(&pedigree, 10);
        // 无任何估计 → 指数按 0,仍产出配对
        let estimates = HashMap::new();

        let allocator = MateAllocator::new(4.0);
        let outcome = allocator.allocate(&[sire], &[dam], &estimates, &resolver, 100.0);
        assert_eq!(outcome.pairs.len(), 1);
        assert!((outcome.pairs[0].score - 0.0).abs() < EPS);
    }
}
