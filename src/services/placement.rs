//! Binary Placement Engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PlacementService                          │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │              RwLock<BinaryTree>                        │  │
//! │  │   nodes (slots, per-leg count/BV, sponsor history)     │  │
//! │  │   day_volumes (per-member per-day leg buckets)         │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                 │ write-through                              │
//! │                 ▼                                            │
//! │          PolicyStore (placements / volumes log)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! 배치는 탐색과 슬롯 획득 전체를 하나의 쓰기 락 아래서 수행.
//! 겹치는 서브트리에 동시 가입이 들어와도 같은 빈 슬롯을
//! 두 번 차지할 수 없음 (직렬화 보장)
//!
//! # Interview Q&A
//!
//! Q: 왜 트리를 메모리에 들고 있는가?
//! A: 배치 탐색(BFS/weak-leg-first)은 노드 단위 락이 필요한
//!    그래프 순회라 SQL로 표현하면 길고 느림. 트리는 배치 로그의
//!    순서 재생(replay)으로 언제든 재구성 가능하며, 로그가 source
//!    of truth. 서버 재시작 시 hydrate()로 복원

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::models::{PlacementRecord, VolumeRecord};
use crate::db::repository::PolicyStore;
use crate::services::binary_policy::{
    AlternateMode, BinaryPolicy, PlacementMode, SpilloverMode, TieBreaker, WeakMetric,
};
use crate::types::{Leg, PeriodKind};

/// 배치 실패
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("sponsor '{0}' is not placed in the tree")]
    SponsorNotFound(String),

    #[error("user '{0}' is not placed in the tree")]
    UnknownUser(String),

    #[error("{0}")]
    Invalid(String),

    /// 탐색 예산 소진 — "스폰서 없음"이나 잘못된 입력과 구분되는 실패
    #[error("no free slot within the search budget (visited {visited} nodes)")]
    SearchExhausted { visited: usize },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// 배치 결과
#[derive(Debug, Clone, Serialize)]
pub struct Placement {
    pub user_id: String,
    /// 루트 노드면 None
    pub parent_id: Option<String>,
    pub leg: Option<Leg>,
    /// 루트로부터의 깊이
    pub depth: u32,
    /// 직속 슬롯이 아닌 다운라인에 배치됨
    pub via_spillover: bool,
    /// 스필오버 탐색이 방문한 노드 수
    pub visited: usize,
    /// false면 이미 배치돼 있던 사용자 (멱등 재호출)
    pub newly_placed: bool,
}

/// 탐색이 확정한 슬롯 (트리 변경 전 단계)
///
/// 영속화가 성공한 뒤에야 트리에 적용됨. 저장 실패 시
/// 메모리는 변하지 않으므로 재시도가 처음부터 다시 배치함
#[derive(Debug, Clone)]
pub struct PlacementDecision {
    pub parent_id: String,
    pub leg: Leg,
    pub via_spillover: bool,
    pub visited: usize,
}

/// 트리 노드
#[derive(Debug, Clone)]
struct Node {
    sponsor_id: Option<String>,
    parent: Option<String>,
    /// 부모 기준 어느 다리에 붙어 있는지
    leg: Option<Leg>,
    left: Option<String>,
    right: Option<String>,
    /// 서브트리 노드 수 (weakMetric=count)
    left_count: u64,
    right_count: u64,
    /// 서브트리 누적 BV (weakMetric=bv)
    left_bv: f64,
    right_bv: f64,
    /// 이 노드가 스폰서로서 마지막으로 배치한 다리 (alternate 모드)
    last_placement_leg: Option<Leg>,
    active: bool,
}

impl Node {
    fn new(sponsor_id: Option<String>, parent: Option<String>, leg: Option<Leg>) -> Self {
        Self {
            sponsor_id,
            parent,
            leg,
            left: None,
            right: None,
            left_count: 0,
            right_count: 0,
            left_bv: 0.0,
            right_bv: 0.0,
            last_placement_leg: None,
            active: true,
        }
    }

    fn child(&self, leg: Leg) -> Option<&String> {
        match leg {
            Leg::Left => self.left.as_ref(),
            Leg::Right => self.right.as_ref(),
        }
    }

    fn metric(&self, leg: Leg, metric: WeakMetric) -> f64 {
        match (metric, leg) {
            (WeakMetric::Count, Leg::Left) => self.left_count as f64,
            (WeakMetric::Count, Leg::Right) => self.right_count as f64,
            (WeakMetric::Bv, Leg::Left) => self.left_bv,
            (WeakMetric::Bv, Leg::Right) => self.right_bv,
        }
    }
}

/// 일 단위 다리별 볼륨 버킷
#[derive(Debug, Clone, Copy, Default)]
pub struct DayVolume {
    pub left: f64,
    pub right: f64,
    /// 직접 추천인이 만든 볼륨 (스필오버 제외)
    pub left_personal: f64,
    pub right_personal: f64,
}

impl DayVolume {
    fn add(&mut self, leg: Leg, personal: bool, bv: f64) {
        match leg {
            Leg::Left => self.left += bv,
            Leg::Right => self.right += bv,
        }
        if personal {
            match leg {
                Leg::Left => self.left_personal += bv,
                Leg::Right => self.right_personal += bv,
            }
        }
    }
}

/// 주기 합산 볼륨
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodVolumes {
    pub left_bv: f64,
    pub right_bv: f64,
    pub left_personal_bv: f64,
    pub right_personal_bv: f64,
}

/// 직접 추천인 요약
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonalsSummary {
    pub active_personals: u32,
    pub in_left: u32,
    pub in_right: u32,
}

/// 볼륨 적립 내역 (조상 1명당 1건)
#[derive(Debug, Clone)]
pub struct VolumeCredit {
    pub ancestor: String,
    pub leg: Leg,
    pub personal: bool,
}

/// user id의 안정 해시로 다리 결정
///
/// 같은 id는 언제나 같은 다리 → 재실행해도 결정적
pub fn stable_leg(user_id: &str) -> Leg {
    let digest = Sha3_256::digest(user_id.as_bytes());
    if digest[0] & 1 == 0 {
        Leg::Left
    } else {
        Leg::Right
    }
}

fn tie_break(user_id: &str, tie_breaker: TieBreaker) -> Leg {
    match tie_breaker {
        TieBreaker::Left => Leg::Left,
        TieBreaker::Right => Leg::Right,
        TieBreaker::StableAuto => stable_leg(user_id),
    }
}

/// 인메모리 바이너리 트리 (포레스트 허용)
#[derive(Debug, Default)]
pub struct BinaryTree {
    nodes: HashMap<String, Node>,
    day_volumes: HashMap<(String, NaiveDate), DayVolume>,
}

impl BinaryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.nodes.contains_key(user_id)
    }

    pub fn set_active(&mut self, user_id: &str, active: bool) -> bool {
        match self.nodes.get_mut(user_id) {
            Some(node) => {
                node.active = active;
                true
            }
            None => false,
        }
    }

    /// 이미 배치된 사용자의 배치 정보
    pub fn placement_of(&self, user_id: &str) -> Option<Placement> {
        let node = self.nodes.get(user_id)?;
        let via_spillover = match (&node.parent, &node.sponsor_id) {
            (Some(parent), Some(sponsor)) => parent != sponsor,
            _ => false,
        };
        Some(Placement {
            user_id: user_id.to_string(),
            parent_id: node.parent.clone(),
            leg: node.leg,
            depth: self.depth_of(user_id),
            via_spillover,
            visited: 0,
            newly_placed: false,
        })
    }

    fn depth_of(&self, user_id: &str) -> u32 {
        let mut depth = 0;
        let mut cur = user_id;
        while let Some(parent) = self.nodes.get(cur).and_then(|n| n.parent.as_deref()) {
            depth += 1;
            cur = parent;
        }
        depth
    }

    /// 루트 노드 삽입 (스폰서 없는 최초 멤버)
    pub fn insert_root(&mut self, user_id: &str) -> Placement {
        if let Some(existing) = self.placement_of(user_id) {
            return existing;
        }
        self.nodes
            .insert(user_id.to_string(), Node::new(None, None, None));
        Placement {
            user_id: user_id.to_string(),
            parent_id: None,
            leg: None,
            depth: 0,
            via_spillover: false,
            visited: 0,
            newly_placed: true,
        }
    }

    /// 신규 사용자를 스폰서 아래에 배치
    ///
    /// 사용자별 멱등: 이미 배치된 id는 기존 배치를 그대로 반환
    pub fn place(
        &mut self,
        user_id: &str,
        sponsor_id: &str,
        policy: &BinaryPolicy,
    ) -> Result<Placement, PlacementError> {
        if let Some(existing) = self.placement_of(user_id) {
            return Ok(existing);
        }
        let decision = self.decide(user_id, sponsor_id, policy)?;
        Ok(self.apply(user_id, sponsor_id, &decision))
    }

    /// 슬롯 탐색만 수행, 트리는 변경하지 않음
    ///
    /// 호출자가 미배치 여부를 먼저 확인해야 함. 확정된 슬롯은
    /// `apply()`로 적용 — 같은 쓰기 락 아래에서는 탐색 결과가
    /// 적용 시점까지 유효함
    pub fn decide(
        &self,
        user_id: &str,
        sponsor_id: &str,
        policy: &BinaryPolicy,
    ) -> Result<PlacementDecision, PlacementError> {
        if user_id == sponsor_id {
            return Err(PlacementError::Invalid(
                "a user cannot sponsor themselves".to_string(),
            ));
        }
        if !self.contains(sponsor_id) {
            return Err(PlacementError::SponsorNotFound(sponsor_id.to_string()));
        }

        let preferred = self.choose_direct_leg(sponsor_id, user_id, policy);

        // 직속 슬롯: 선호 다리 → 반대 다리 → 스필오버
        for leg in [preferred, preferred.opposite()] {
            if self.slot_free(sponsor_id, leg) {
                return Ok(PlacementDecision {
                    parent_id: sponsor_id.to_string(),
                    leg,
                    via_spillover: false,
                    visited: 0,
                });
            }
        }

        let pref = tie_break(user_id, policy.tie_breaker);
        let (parent, leg, visited) = match policy.spillover_mode {
            SpilloverMode::Bfs => self.bfs_search(sponsor_id, pref, policy)?,
            SpilloverMode::WeakLegFirst => self.weak_first_search(sponsor_id, pref, policy)?,
        };

        Ok(PlacementDecision {
            parent_id: parent,
            leg,
            via_spillover: true,
            visited,
        })
    }

    /// 확정된 슬롯을 트리에 적용
    pub fn apply(
        &mut self,
        user_id: &str,
        sponsor_id: &str,
        decision: &PlacementDecision,
    ) -> Placement {
        self.attach(
            user_id,
            sponsor_id,
            &decision.parent_id,
            decision.leg,
            decision.via_spillover,
            decision.visited,
        )
    }

    fn slot_free(&self, node_id: &str, leg: Leg) -> bool {
        self.nodes
            .get(node_id)
            .map(|n| n.child(leg).is_none())
            .unwrap_or(false)
    }

    fn choose_direct_leg(&self, sponsor_id: &str, user_id: &str, policy: &BinaryPolicy) -> Leg {
        let sponsor = &self.nodes[sponsor_id];
        match policy.placement_mode {
            PlacementMode::StrictLeft => Leg::Left,
            PlacementMode::StrictRight => Leg::Right,
            PlacementMode::AutoWeak => {
                let left = sponsor.metric(Leg::Left, policy.weak_metric);
                let right = sponsor.metric(Leg::Right, policy.weak_metric);
                if left < right {
                    Leg::Left
                } else if right < left {
                    Leg::Right
                } else {
                    tie_break(user_id, policy.tie_breaker)
                }
            }
            PlacementMode::Alternate => match policy.alternate_mode {
                AlternateMode::SponsorHistory => sponsor
                    .last_placement_leg
                    .map(Leg::opposite)
                    .unwrap_or_else(|| tie_break(user_id, policy.tie_breaker)),
                AlternateMode::StableAuto => stable_leg(user_id),
            },
        }
    }

    /// 레벨 순서(BFS) 스필오버 탐색
    ///
    /// 방문 노드 수가 예산을 넘으면 즉시 중단하고 소진 보고
    fn bfs_search(
        &self,
        from: &str,
        pref: Leg,
        policy: &BinaryPolicy,
    ) -> Result<(String, Leg, usize), PlacementError> {
        let budget = policy.max_bfs_visited;
        let mut visited = 0usize;
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(id) = queue.pop_front() {
            if visited >= budget {
                return Err(PlacementError::SearchExhausted { visited });
            }
            visited += 1;

            let node = &self.nodes[&id];
            for leg in [pref, pref.opposite()] {
                if node.child(leg).is_none() {
                    return Ok((id, leg, visited));
                }
            }
            for leg in [pref, pref.opposite()] {
                if let Some(child) = node.child(leg) {
                    queue.push_back(child.clone());
                }
            }
        }

        // 유한 트리에서는 도달 불가 (리프는 항상 빈 슬롯을 가짐)
        Err(PlacementError::SearchExhausted { visited })
    }

    /// 약한 다리 우선 스필오버 탐색 (재귀 하강)
    fn weak_first_search(
        &self,
        from: &str,
        pref: Leg,
        policy: &BinaryPolicy,
    ) -> Result<(String, Leg, usize), PlacementError> {
        let mut visited = 0usize;
        match self.weak_first_inner(from, pref, policy, &mut visited) {
            Some(found) => Ok((found.0, found.1, visited)),
            None => Err(PlacementError::SearchExhausted { visited }),
        }
    }

    fn weak_first_inner(
        &self,
        id: &str,
        pref: Leg,
        policy: &BinaryPolicy,
        visited: &mut usize,
    ) -> Option<(String, Leg)> {
        if *visited >= policy.max_bfs_visited {
            return None;
        }
        *visited += 1;

        let node = &self.nodes[id];
        for leg in [pref, pref.opposite()] {
            if node.child(leg).is_none() {
                return Some((id.to_string(), leg));
            }
        }

        // 양쪽 다 찼으면 약한 다리부터 하강 (동률이면 선호 다리)
        let left = node.metric(Leg::Left, policy.weak_metric);
        let right = node.metric(Leg::Right, policy.weak_metric);
        let first = if left < right {
            Leg::Left
        } else if right < left {
            Leg::Right
        } else {
            pref
        };

        for leg in [first, first.opposite()] {
            let child = node.child(leg).cloned()?;
            if let Some(found) = self.weak_first_inner(&child, pref, policy, visited) {
                return Some(found);
            }
            if *visited >= policy.max_bfs_visited {
                return None;
            }
        }
        None
    }

    fn attach(
        &mut self,
        user_id: &str,
        sponsor_id: &str,
        parent_id: &str,
        leg: Leg,
        via_spillover: bool,
        visited: usize,
    ) -> Placement {
        self.nodes.insert(
            user_id.to_string(),
            Node::new(
                Some(sponsor_id.to_string()),
                Some(parent_id.to_string()),
                Some(leg),
            ),
        );

        if let Some(parent) = self.nodes.get_mut(parent_id) {
            match leg {
                Leg::Left => parent.left = Some(user_id.to_string()),
                Leg::Right => parent.right = Some(user_id.to_string()),
            }
        }

        // 조상 체인의 서브트리 카운트 갱신
        for (ancestor, ancestor_leg) in self.ancestor_chain(user_id) {
            if let Some(node) = self.nodes.get_mut(&ancestor) {
                match ancestor_leg {
                    Leg::Left => node.left_count += 1,
                    Leg::Right => node.right_count += 1,
                }
            }
        }

        // 스폰서 기준 다리 기록 (alternate의 sponsor_history)
        let sponsor_leg = self.leg_under(sponsor_id, user_id);
        if let Some(sponsor) = self.nodes.get_mut(sponsor_id) {
            sponsor.last_placement_leg = sponsor_leg;
        }

        Placement {
            user_id: user_id.to_string(),
            parent_id: Some(parent_id.to_string()),
            leg: Some(leg),
            depth: self.depth_of(user_id),
            via_spillover,
            visited,
            newly_placed: true,
        }
    }

    /// (조상 id, 해당 조상 기준 다리) 목록 — 가까운 조상부터
    fn ancestor_chain(&self, user_id: &str) -> Vec<(String, Leg)> {
        let mut chain = Vec::new();
        let mut cur = user_id.to_string();
        while let Some(node) = self.nodes.get(&cur) {
            let (Some(parent), Some(leg)) = (node.parent.clone(), node.leg) else {
                break;
            };
            chain.push((parent.clone(), leg));
            cur = parent;
        }
        chain
    }

    /// descendant가 ancestor의 어느 다리 아래에 있는지
    fn leg_under(&self, ancestor: &str, descendant: &str) -> Option<Leg> {
        let mut cur = descendant.to_string();
        while let Some(node) = self.nodes.get(&cur) {
            let parent = node.parent.clone()?;
            if parent == ancestor {
                return node.leg;
            }
            cur = parent;
        }
        None
    }

    /// BV 발생을 조상 체인에 적립
    ///
    /// 각 조상에 대해: 발생자가 그 조상의 직접 추천인이면 personal,
    /// 아니면 스필오버 볼륨으로 분류
    pub fn credit_volume(
        &mut self,
        contributor: &str,
        bv: f64,
        day: NaiveDate,
    ) -> Result<Vec<VolumeCredit>, PlacementError> {
        let credits = self.plan_credits(contributor)?;
        self.apply_credits(&credits, bv, day);
        Ok(credits)
    }

    /// 적립 대상 조상 목록 계산, 트리는 변경하지 않음
    pub fn plan_credits(&self, contributor: &str) -> Result<Vec<VolumeCredit>, PlacementError> {
        if !self.contains(contributor) {
            return Err(PlacementError::UnknownUser(contributor.to_string()));
        }

        let sponsor = self.nodes[contributor].sponsor_id.clone();
        Ok(self
            .ancestor_chain(contributor)
            .into_iter()
            .map(|(ancestor, leg)| {
                let personal = sponsor.as_deref() == Some(ancestor.as_str());
                VolumeCredit {
                    ancestor,
                    leg,
                    personal,
                }
            })
            .collect())
    }

    /// 계산된 적립 내역을 노드 누적 BV와 일 버킷에 반영
    pub fn apply_credits(&mut self, credits: &[VolumeCredit], bv: f64, day: NaiveDate) {
        for credit in credits {
            if let Some(node) = self.nodes.get_mut(&credit.ancestor) {
                match credit.leg {
                    Leg::Left => node.left_bv += bv,
                    Leg::Right => node.right_bv += bv,
                }
            }
            self.day_volumes
                .entry((credit.ancestor.clone(), day))
                .or_default()
                .add(credit.leg, credit.personal, bv);
        }
    }

    /// 적립이 반영됐을 때의 일 버킷 값 (반영 전 미리 계산)
    pub fn bucket_after(&self, credit: &VolumeCredit, bv: f64, day: NaiveDate) -> DayVolume {
        let mut bucket = self.day_volume(&credit.ancestor, day).unwrap_or_default();
        bucket.add(credit.leg, credit.personal, bv);
        bucket
    }

    pub fn day_volume(&self, user_id: &str, day: NaiveDate) -> Option<DayVolume> {
        self.day_volumes.get(&(user_id.to_string(), day)).copied()
    }

    /// 주기 합산 볼륨
    pub fn period_volumes(&self, user_id: &str, kind: PeriodKind, start: NaiveDate) -> PeriodVolumes {
        let mut total = PeriodVolumes::default();
        for offset in 0..kind.days() {
            let day = start + chrono::Duration::days(i64::from(offset));
            if let Some(dv) = self.day_volume(user_id, day) {
                total.left_bv += dv.left;
                total.right_bv += dv.right;
                total.left_personal_bv += dv.left_personal;
                total.right_personal_bv += dv.right_personal;
            }
        }
        total
    }

    /// 활성 직접 추천인 요약
    pub fn personals(&self, user_id: &str) -> PersonalsSummary {
        let mut summary = PersonalsSummary::default();
        for (id, node) in &self.nodes {
            if node.sponsor_id.as_deref() != Some(user_id) || !node.active {
                continue;
            }
            summary.active_personals += 1;
            match self.leg_under(user_id, id) {
                Some(Leg::Left) => summary.in_left += 1,
                Some(Leg::Right) => summary.in_right += 1,
                None => {}
            }
        }
        summary
    }

    /// 배치 로그 1건 재생 (hydrate 경로, 탐색 없음)
    fn restore(&mut self, rec: &PlacementRecord) {
        if self.contains(&rec.user_id) {
            return;
        }
        match (&rec.parent_id, rec.leg.as_deref().and_then(Leg::parse)) {
            (Some(parent), Some(leg)) => {
                let sponsor = rec.sponsor_id.clone().unwrap_or_else(|| parent.clone());
                self.attach(&rec.user_id, &sponsor, parent, leg, rec.via_spillover, 0);
            }
            _ => {
                self.insert_root(&rec.user_id);
            }
        }
    }

    fn restore_volume(&mut self, rec: &VolumeRecord) {
        self.day_volumes.insert(
            (rec.user_id.clone(), rec.day),
            DayVolume {
                left: rec.left_bv,
                right: rec.right_bv,
                left_personal: rec.left_personal_bv,
                right_personal: rec.right_personal_bv,
            },
        );
        // 노드 누적 BV도 복원 (weak 판정에 사용)
        if let Some(node) = self.nodes.get_mut(&rec.user_id) {
            node.left_bv += rec.left_bv;
            node.right_bv += rec.right_bv;
        }
    }
}

/// 배치 서비스 (트리 + 저장소 write-through)
pub struct PlacementService {
    tree: RwLock<BinaryTree>,
    store: Arc<dyn PolicyStore>,
}

impl PlacementService {
    /// 저장소의 배치/볼륨 로그를 재생해 트리 복원
    pub async fn hydrate(store: Arc<dyn PolicyStore>) -> anyhow::Result<Self> {
        let mut tree = BinaryTree::new();

        let placements = store.load_placements().await?;
        for rec in &placements {
            tree.restore(rec);
        }
        let volumes = store.load_volumes().await?;
        for rec in &volumes {
            tree.restore_volume(rec);
        }

        tracing::info!(
            members = tree.len(),
            volume_days = volumes.len(),
            "Binary tree hydrated from placement log"
        );

        Ok(Self {
            tree: RwLock::new(tree),
            store,
        })
    }

    /// 배치 실행 + 신규 배치면 로그 영속화
    ///
    /// 쓰기 락이 탐색~영속화~적용을 모두 감싸므로 슬롯 경합 없음.
    /// 로그가 진실의 원천: 트리는 영속화가 성공한 뒤에만 변경되고,
    /// 저장 실패 시 메모리는 그대로라 재시도가 배치를 다시 수행함
    pub async fn place(
        &self,
        user_id: &str,
        sponsor_id: Option<&str>,
        policy: &BinaryPolicy,
    ) -> Result<Placement, PlacementError> {
        let mut tree = self.tree.write().await;

        if let Some(existing) = tree.placement_of(user_id) {
            return Ok(existing);
        }

        let decision = match sponsor_id {
            Some(sponsor) => Some(tree.decide(user_id, sponsor, policy)?),
            None => None,
        };

        tracing::debug!(
            user = user_id,
            parent = decision.as_ref().map(|d| d.parent_id.as_str()).unwrap_or("-"),
            leg = decision.as_ref().map(|d| d.leg.as_str()).unwrap_or("-"),
            spillover = decision.as_ref().map(|d| d.via_spillover).unwrap_or(false),
            hash = %hex::encode(&Sha3_256::digest(user_id.as_bytes())[..4]),
            "Placement decided"
        );

        let rec = PlacementRecord {
            user_id: user_id.to_string(),
            sponsor_id: sponsor_id.map(str::to_string),
            parent_id: decision.as_ref().map(|d| d.parent_id.clone()),
            leg: decision.as_ref().map(|d| d.leg.as_str().to_string()),
            via_spillover: decision.as_ref().map(|d| d.via_spillover).unwrap_or(false),
            created_at: chrono::Utc::now(),
        };
        self.store.insert_placement(&rec).await?;

        let placement = match (sponsor_id, decision) {
            (Some(sponsor), Some(decision)) => tree.apply(user_id, sponsor, &decision),
            _ => tree.insert_root(user_id),
        };
        Ok(placement)
    }

    /// BV 발생 기록 + 영향 받은 조상 버킷 영속화
    ///
    /// 버킷 값을 미리 계산해 전부 저장한 뒤에야 메모리에 반영.
    /// 중간에 저장이 실패하면 메모리는 그대로이므로, 재시도는 같은
    /// 버킷 값을 다시 upsert할 뿐 이중 적립이 생기지 않음
    pub async fn record_volume(
        &self,
        contributor: &str,
        bv: f64,
        day: NaiveDate,
    ) -> Result<usize, PlacementError> {
        if bv <= 0.0 {
            return Err(PlacementError::Invalid("bv must be > 0".to_string()));
        }

        let mut tree = self.tree.write().await;
        let credits = tree.plan_credits(contributor)?;

        for credit in &credits {
            let bucket = tree.bucket_after(credit, bv, day);
            let rec = VolumeRecord {
                user_id: credit.ancestor.clone(),
                day,
                left_bv: bucket.left,
                right_bv: bucket.right,
                left_personal_bv: bucket.left_personal,
                right_personal_bv: bucket.right_personal,
            };
            self.store.upsert_volume(&rec).await?;
        }

        tree.apply_credits(&credits, bv, day);
        Ok(credits.len())
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.tree.read().await.contains(user_id)
    }

    pub async fn placement_of(&self, user_id: &str) -> Option<Placement> {
        self.tree.read().await.placement_of(user_id)
    }

    pub async fn period_volumes(
        &self,
        user_id: &str,
        kind: PeriodKind,
        start: NaiveDate,
    ) -> PeriodVolumes {
        self.tree.read().await.period_volumes(user_id, kind, start)
    }

    pub async fn personals(&self, user_id: &str) -> PersonalsSummary {
        self.tree.read().await.personals(user_id)
    }

    #[cfg(test)]
    pub async fn tree_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, BinaryTree> {
        self.tree.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::mock::MemoryStore;

    fn policy() -> BinaryPolicy {
        BinaryPolicy::default()
    }

    fn strict_left() -> BinaryPolicy {
        BinaryPolicy {
            placement_mode: PlacementMode::StrictLeft,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    /// root 아래 left/right가 모두 찬 3노드 트리
    fn full_root(p: &BinaryPolicy) -> BinaryTree {
        let mut tree = BinaryTree::new();
        tree.insert_root("root");
        tree.place("a", "root", p).unwrap();
        tree.place("b", "root", p).unwrap();
        tree
    }

    #[test]
    fn test_strict_left_fills_left_then_right() {
        let p = strict_left();
        let mut tree = BinaryTree::new();
        tree.insert_root("root");

        let first = tree.place("a", "root", &p).unwrap();
        assert_eq!(first.leg, Some(Leg::Left));
        assert!(!first.via_spillover);

        let second = tree.place("b", "root", &p).unwrap();
        assert_eq!(second.leg, Some(Leg::Right));

        // 세 번째는 스필오버
        let third = tree.place("c", "root", &p).unwrap();
        assert!(third.via_spillover);
        assert_eq!(third.parent_id.as_deref(), Some("a"));
        assert_eq!(third.leg, Some(Leg::Left));
        assert_eq!(third.depth, 2);
    }

    #[test]
    fn test_placement_is_idempotent() {
        let p = strict_left();
        let mut tree = BinaryTree::new();
        tree.insert_root("root");

        let first = tree.place("a", "root", &p).unwrap();
        assert!(first.newly_placed);

        // 같은 사용자 재배치 → no-op, 기존 배치 반환
        let again = tree.place("a", "root", &p).unwrap();
        assert!(!again.newly_placed);
        assert_eq!(again.parent_id, first.parent_id);
        assert_eq!(again.leg, first.leg);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_stable_auto_is_deterministic() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::AutoWeak,
            tie_breaker: TieBreaker::StableAuto,
            ..BinaryPolicy::default()
        };

        // 동일 입력의 두 트리에서 같은 사용자는 항상 같은 다리
        let mut first = BinaryTree::new();
        first.insert_root("root");
        let mut second = BinaryTree::new();
        second.insert_root("root");

        let a = first.place("user-42", "root", &p).unwrap();
        let b = second.place("user-42", "root", &p).unwrap();
        assert_eq!(a.leg, b.leg);

        // 순수 해시도 반복 호출에 안정적
        assert_eq!(stable_leg("user-42"), stable_leg("user-42"));
    }

    #[test]
    fn test_auto_weak_by_count() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::AutoWeak,
            weak_metric: WeakMetric::Count,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        let mut tree = BinaryTree::new();
        tree.insert_root("root");
        tree.place("a", "root", &strict_left()).unwrap();

        // left에 1명, right에 0명 → right가 약한 다리
        let placed = tree.place("b", "root", &p).unwrap();
        assert_eq!(placed.parent_id.as_deref(), Some("root"));
        assert_eq!(placed.leg, Some(Leg::Right));
        assert!(!placed.via_spillover);
    }

    #[test]
    fn test_auto_weak_by_bv() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::AutoWeak,
            weak_metric: WeakMetric::Bv,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        let mut tree = BinaryTree::new();
        tree.insert_root("root");
        tree.place("a", "root", &strict_left()).unwrap();

        // left 다리에만 BV 발생 → right가 약한 다리
        tree.credit_volume("a", 300.0, day(2)).unwrap();
        let placed = tree.place("b", "root", &p).unwrap();
        assert_eq!(placed.leg, Some(Leg::Right));
    }

    #[test]
    fn test_alternate_sponsor_history() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::Alternate,
            alternate_mode: AlternateMode::SponsorHistory,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        let mut tree = BinaryTree::new();
        tree.insert_root("root");

        // 첫 배치는 타이브레이크(left), 이후 반대 다리로 교대
        let first = tree.place("a", "root", &p).unwrap();
        assert_eq!(first.leg, Some(Leg::Left));
        let second = tree.place("b", "root", &p).unwrap();
        assert_eq!(second.leg, Some(Leg::Right));
    }

    #[test]
    fn test_bfs_spillover_respects_tie_breaker() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::StrictLeft,
            tie_breaker: TieBreaker::Right,
            ..BinaryPolicy::default()
        };
        let mut tree = full_root(&strict_left());

        // 직속 슬롯 만석 → BFS, tieBreaker=right면 right 자식부터
        let placed = tree.place("c", "root", &p).unwrap();
        assert!(placed.via_spillover);
        assert_eq!(placed.parent_id.as_deref(), Some("b"));
        assert_eq!(placed.leg, Some(Leg::Right));
    }

    #[test]
    fn test_bfs_budget_exhaustion_terminates() {
        let mut p = strict_left();
        p.max_bfs_visited = 1;
        let mut tree = full_root(&strict_left());

        // 예산 1 → 스폰서만 보고 중단, 명시적 소진 에러
        let err = tree.place("c", "root", &p).unwrap_err();
        match err {
            PlacementError::SearchExhausted { visited } => assert_eq!(visited, 1),
            other => panic!("expected SearchExhausted, got {:?}", other),
        }
        // 실패한 배치는 트리에 남지 않음
        assert!(!tree.contains("c"));
    }

    #[test]
    fn test_weak_leg_first_descends_weak_leg() {
        let p = BinaryPolicy {
            placement_mode: PlacementMode::StrictLeft,
            spillover_mode: SpilloverMode::WeakLegFirst,
            weak_metric: WeakMetric::Count,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        let mut tree = full_root(&strict_left());

        // left 서브트리를 무겁게 만들면 right 다리로 하강
        tree.place("c", "a", &strict_left()).unwrap();
        tree.place("d", "a", &strict_left()).unwrap();

        let placed = tree.place("e", "root", &p).unwrap();
        assert!(placed.via_spillover);
        assert_eq!(placed.parent_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_weak_leg_first_budget_exhaustion() {
        let p = BinaryPolicy {
            spillover_mode: SpilloverMode::WeakLegFirst,
            max_bfs_visited: 1,
            placement_mode: PlacementMode::StrictLeft,
            tie_breaker: TieBreaker::Left,
            ..BinaryPolicy::default()
        };
        let mut tree = full_root(&strict_left());

        let err = tree.place("c", "root", &p).unwrap_err();
        assert!(matches!(err, PlacementError::SearchExhausted { .. }));
    }

    #[test]
    fn test_sponsor_not_found() {
        let mut tree = BinaryTree::new();
        let err = tree.place("a", "ghost", &policy()).unwrap_err();
        assert!(matches!(err, PlacementError::SponsorNotFound(_)));
    }

    #[test]
    fn test_volume_propagates_with_personal_split() {
        let p = strict_left();
        let mut tree = full_root(&p);
        // c는 a가 스폰서, a의 left에 배치됨
        tree.place("c", "a", &p).unwrap();

        tree.credit_volume("c", 100.0, day(2)).unwrap();

        // a 기준: c는 직접 추천인 → personal
        let a_vol = tree.day_volume("a", day(2)).unwrap();
        assert_eq!(a_vol.left, 100.0);
        assert_eq!(a_vol.left_personal, 100.0);

        // root 기준: c는 스필오버 (root가 스폰서 아님) → personal 아님
        let root_vol = tree.day_volume("root", day(2)).unwrap();
        assert_eq!(root_vol.left, 100.0);
        assert_eq!(root_vol.left_personal, 0.0);
        assert_eq!(root_vol.right, 0.0);
    }

    #[test]
    fn test_personals_summary() {
        let p = strict_left();
        let mut tree = full_root(&p);
        // a, b 모두 root의 직접 추천인
        let summary = tree.personals("root");
        assert_eq!(summary.active_personals, 2);
        assert_eq!(summary.in_left, 1);
        assert_eq!(summary.in_right, 1);

        // b 비활성화 → 집계 제외
        tree.set_active("b", false);
        let summary = tree.personals("root");
        assert_eq!(summary.active_personals, 1);
        assert_eq!(summary.in_right, 0);
    }

    #[test]
    fn test_subtree_counts_maintained() {
        let p = strict_left();
        let mut tree = full_root(&p);
        tree.place("c", "a", &p).unwrap();
        tree.place("d", "c", &p).unwrap();

        let summary = tree.personals("root");
        assert_eq!(summary.active_personals, 2);
        // root의 left 서브트리에는 a, c, d → count 3
        let root = tree.nodes.get("root").unwrap();
        assert_eq!(root.left_count, 3);
        assert_eq!(root.right_count, 1);
    }

    #[tokio::test]
    async fn test_service_persists_and_hydrates() {
        let store: Arc<dyn PolicyStore> = Arc::new(MemoryStore::new());
        let p = strict_left();

        let service = PlacementService::hydrate(store.clone()).await.unwrap();
        service.place("root", None, &p).await.unwrap();
        service.place("a", Some("root"), &p).await.unwrap();
        service.place("b", Some("root"), &p).await.unwrap();
        service.record_volume("a", 120.0, day(2)).await.unwrap();

        // 같은 저장소에서 새로 hydrate → 동일한 트리
        let rebuilt = PlacementService::hydrate(store.clone()).await.unwrap();
        assert!(rebuilt.contains("a").await);
        assert!(rebuilt.contains("b").await);

        let vols = rebuilt
            .period_volumes("root", PeriodKind::Day, day(2))
            .await;
        assert_eq!(vols.left_bv, 120.0);

        // 멱등성: 이미 배치된 사용자는 저장소에 중복 기록되지 않음
        let again = rebuilt.place("a", Some("root"), &p).await.unwrap();
        assert!(!again.newly_placed);
        assert_eq!(store.load_placements().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_placement_store_failure_leaves_tree_unchanged() {
        let mem = Arc::new(MemoryStore::new());
        let store: Arc<dyn PolicyStore> = mem.clone();
        let p = strict_left();

        let service = PlacementService::hydrate(store.clone()).await.unwrap();
        service.place("root", None, &p).await.unwrap();

        // 두 번째 insert_placement(= "a")가 일시 실패
        mem.fail_insert_placement_on(2);
        let err = service.place("a", Some("root"), &p).await.unwrap_err();
        assert!(matches!(err, PlacementError::Store(_)));

        // 메모리에도 남지 않음 → 재시도가 멱등 경로로 빠지지 않음
        assert!(!service.contains("a").await);

        let retried = service.place("a", Some("root"), &p).await.unwrap();
        assert!(retried.newly_placed);

        // 로그에 기록돼 있고 재생해도 존재
        let logged = store.load_placements().await.unwrap();
        assert!(logged.iter().any(|r| r.user_id == "a"));
        let rebuilt = PlacementService::hydrate(store.clone()).await.unwrap();
        assert!(rebuilt.contains("a").await);
    }

    #[tokio::test]
    async fn test_volume_retry_after_store_failure_does_not_double_credit() {
        let mem = Arc::new(MemoryStore::new());
        let store: Arc<dyn PolicyStore> = mem.clone();
        let p = strict_left();

        let service = PlacementService::hydrate(store.clone()).await.unwrap();
        service.place("root", None, &p).await.unwrap();
        service.place("a", Some("root"), &p).await.unwrap();
        service.place("b", Some("a"), &p).await.unwrap();

        // 조상 [a, root] 중 두 번째 upsert만 실패 → 부분 실패
        mem.fail_upsert_volume_on(2);
        let err = service.record_volume("b", 100.0, day(2)).await.unwrap_err();
        assert!(matches!(err, PlacementError::Store(_)));

        // 메모리 버킷은 반영 전 상태 그대로
        let a_vols = service.period_volumes("a", PeriodKind::Day, day(2)).await;
        assert_eq!(a_vols.left_bv, 0.0);

        // 재시도: 같은 버킷 값을 다시 upsert할 뿐, 이중 적립 없음
        let credited = service.record_volume("b", 100.0, day(2)).await.unwrap();
        assert_eq!(credited, 2);
        let a_vols = service.period_volumes("a", PeriodKind::Day, day(2)).await;
        assert_eq!(a_vols.left_bv, 100.0);
        let root_vols = service.period_volumes("root", PeriodKind::Day, day(2)).await;
        assert_eq!(root_vols.left_bv, 100.0);

        // 저장소에도 조상당 1건, 값은 100
        let records = store.load_volumes().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.left_bv == 100.0));
    }
}
