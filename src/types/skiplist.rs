use crate::types::border::ScoreBorder;
use rand::Rng;

pub const MAX_LEVEL: usize = 16;

/// Sentinel index meaning "no node".
const NIL: u32 = u32::MAX;
/// The header sentinel always occupies slot 0 of the arena.
const HEAD: u32 = 0;

/// Probability threshold for promoting a node one level: 1/4.
const PROMOTE_THRESHOLD: u32 = (0.25 * 0xFFFF as f64) as u32;

/// A member/score pair as surfaced to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub member: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct Level {
    forward: u32,
    /// Number of level-0 nodes this forward pointer skips over.
    span: u64,
}

#[derive(Debug, Clone)]
struct Node {
    member: String,
    score: f64,
    backward: u32,
    levels: Vec<Level>,
}

/// Skiplist ordered by `(score, member)` with span-accounted forward
/// pointers for O(log n) rank queries.
///
/// Nodes live in an arena `Vec` and link to each other by index, with a
/// free-list for removed slots; backward pointers are plain indices, so the
/// structure has no ownership cycles.
#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<u32>,
    tail: u32,
    length: u64,
    level: usize,
}

impl SkipList {
    pub fn new() -> Self {
        let header = Node {
            member: String::new(),
            score: 0.0,
            backward: NIL,
            levels: (0..MAX_LEVEL)
                .map(|_| Level {
                    forward: NIL,
                    span: 0,
                })
                .collect(),
        };
        SkipList {
            nodes: vec![header],
            free: Vec::new(),
            tail: NIL,
            length: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    fn alloc(&mut self, height: usize, score: f64, member: String) -> u32 {
        let levels = (0..height)
            .map(|_| Level {
                forward: NIL,
                span: 0,
            })
            .collect();
        let node = Node {
            member,
            score,
            backward: NIL,
            levels,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    /// Does the forward neighbour of `idx` at `level` sort before
    /// `(score, member)`?
    fn forward_precedes(&self, idx: u32, level: usize, score: f64, member: &str) -> bool {
        let forward = self.node(idx).levels[level].forward;
        if forward == NIL {
            return false;
        }
        let next = self.node(forward);
        next.score < score || (next.score == score && next.member.as_str() < member)
    }

    pub fn insert(&mut self, member: String, score: f64) {
        // Find the predecessor at every level, remembering the rank walked
        // to reach it so the new spans can be derived afterwards.
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u64; MAX_LEVEL];

        let mut node = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while self.forward_precedes(node, i, score, &member) {
                rank[i] += self.node(node).levels[i].span;
                node = self.node(node).levels[i].forward;
            }
            update[i] = node;
        }

        let height = random_level();
        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD as usize].levels[i].span = self.length;
            }
            self.level = height;
        }

        let new = self.alloc(height, score, member);
        for i in 0..height {
            let prev = update[i] as usize;
            self.nodes[new as usize].levels[i].forward = self.nodes[prev].levels[i].forward;
            self.nodes[prev].levels[i].forward = new;

            let prev_span = self.nodes[prev].levels[i].span;
            self.nodes[new as usize].levels[i].span = prev_span - (rank[0] - rank[i]);
            self.nodes[prev].levels[i].span = (rank[0] - rank[i]) + 1;
        }
        // Levels the new node does not reach now skip one more node.
        for i in height..self.level {
            self.nodes[update[i] as usize].levels[i].span += 1;
        }

        self.nodes[new as usize].backward = if update[0] == HEAD { NIL } else { update[0] };
        let next = self.nodes[new as usize].levels[0].forward;
        if next != NIL {
            self.nodes[next as usize].backward = new;
        } else {
            self.tail = new;
        }
        self.length += 1;
    }

    pub fn remove(&mut self, member: &str, score: f64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while self.forward_precedes(node, i, score, member) {
                node = self.node(node).levels[i].forward;
            }
            update[i] = node;
        }

        let target = self.node(node).levels[0].forward;
        if target == NIL {
            return false;
        }
        let found = self.node(target);
        if found.score != score || found.member != member {
            return false;
        }
        self.unlink(target, &update);
        true
    }

    /// Detach `node` given the predecessor array for its position, fixing
    /// spans, backward links, the tail and the list height.
    fn unlink(&mut self, node: u32, update: &[u32; MAX_LEVEL]) {
        for i in 0..self.level {
            let prev = update[i] as usize;
            if self.nodes[prev].levels[i].forward == node {
                let merged =
                    self.nodes[prev].levels[i].span + self.nodes[node as usize].levels[i].span;
                self.nodes[prev].levels[i].span = merged - 1;
                self.nodes[prev].levels[i].forward = self.nodes[node as usize].levels[i].forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let next = self.nodes[node as usize].levels[0].forward;
        let back = self.nodes[node as usize].backward;
        if next != NIL {
            self.nodes[next as usize].backward = back;
        } else {
            self.tail = back;
        }

        while self.level > 1 && self.nodes[HEAD as usize].levels[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.free.push(node);
        self.length -= 1;
    }

    /// 1-based rank of a member, 0 when absent. The caller supplies the
    /// score from its own index so the search can use the sort order.
    pub fn rank_of(&self, member: &str, score: f64) -> u64 {
        let mut rank: u64 = 0;
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                if forward == NIL {
                    break;
                }
                let next = self.node(forward);
                if next.score < score
                    || (next.score == score && next.member.as_str() <= member)
                {
                    rank += self.node(node).levels[i].span;
                    node = forward;
                } else {
                    break;
                }
            }
            if node != HEAD && self.node(node).member == member {
                return rank;
            }
        }
        0
    }

    /// Node at a 1-based rank.
    pub fn node_by_rank(&self, rank: u64) -> Option<u32> {
        if rank == 0 || rank > self.length {
            return None;
        }
        let mut walked: u64 = 0;
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                let span = self.node(node).levels[i].span;
                if forward == NIL || walked + span > rank {
                    break;
                }
                walked += span;
                node = forward;
            }
            if walked == rank {
                return Some(node);
            }
        }
        None
    }

    /// Can any element fall inside `[min, max]`?
    pub fn has_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> bool {
        if min.excludes_all_of(max) {
            return false;
        }
        if self.tail == NIL || !min.less(self.node(self.tail).score) {
            return false;
        }
        let first = self.node(HEAD).levels[0].forward;
        if first == NIL || !max.greater(self.node(first).score) {
            return false;
        }
        true
    }

    /// First node with a score inside the range, if any.
    pub fn first_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<u32> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                if forward == NIL || min.less(self.node(forward).score) {
                    break;
                }
                node = forward;
            }
        }
        let candidate = self.node(node).levels[0].forward;
        if candidate == NIL || !max.greater(self.node(candidate).score) {
            return None;
        }
        Some(candidate)
    }

    /// Last node with a score inside the range, if any.
    pub fn last_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<u32> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                if forward == NIL || !max.greater(self.node(forward).score) {
                    break;
                }
                node = forward;
            }
        }
        if node == HEAD || !min.less(self.node(node).score) {
            return None;
        }
        Some(node)
    }

    /// Remove up to `limit` elements with scores inside the range
    /// (`limit == 0` means no limit), returning the removed elements.
    pub fn remove_range_by_score(
        &mut self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        limit: usize,
    ) -> Vec<Element> {
        let mut update = [HEAD; MAX_LEVEL];
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                if forward == NIL || min.less(self.node(forward).score) {
                    break;
                }
                node = forward;
            }
            update[i] = node;
        }

        let mut removed = Vec::new();
        let mut node = self.node(node).levels[0].forward;
        while node != NIL && max.greater(self.node(node).score) {
            if limit > 0 && removed.len() >= limit {
                break;
            }
            let next = self.node(node).levels[0].forward;
            removed.push(Element {
                member: self.node(node).member.clone(),
                score: self.node(node).score,
            });
            self.unlink(node, &update);
            node = next;
        }
        removed
    }

    /// Remove elements whose 1-based rank falls in `[start, stop)`.
    pub fn remove_range_by_rank(&mut self, start: u64, stop: u64) -> Vec<Element> {
        let mut walked: u64 = 0;
        let mut update = [HEAD; MAX_LEVEL];
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            loop {
                let forward = self.node(node).levels[i].forward;
                let span = self.node(node).levels[i].span;
                if forward == NIL || walked + span >= start {
                    break;
                }
                walked += span;
                node = forward;
            }
            update[i] = node;
        }

        let mut removed = Vec::new();
        walked += 1;
        let mut node = self.node(node).levels[0].forward;
        while node != NIL && walked < stop {
            let next = self.node(node).levels[0].forward;
            removed.push(Element {
                member: self.node(node).member.clone(),
                score: self.node(node).score,
            });
            self.unlink(node, &update);
            node = next;
            walked += 1;
        }
        removed
    }

    pub fn first(&self) -> Option<u32> {
        let first = self.node(HEAD).levels[0].forward;
        (first != NIL).then_some(first)
    }

    pub fn last(&self) -> Option<u32> {
        (self.tail != NIL).then_some(self.tail)
    }

    pub fn next(&self, idx: u32) -> Option<u32> {
        let forward = self.node(idx).levels[0].forward;
        (forward != NIL).then_some(forward)
    }

    pub fn prev(&self, idx: u32) -> Option<u32> {
        let backward = self.node(idx).backward;
        (backward != NIL).then_some(backward)
    }

    pub fn element(&self, idx: u32) -> Element {
        let node = self.node(idx);
        Element {
            member: node.member.clone(),
            score: node.score,
        }
    }

    pub fn score(&self, idx: u32) -> f64 {
        self.node(idx).score
    }

    #[cfg(test)]
    fn span_sum(&self, level: usize) -> u64 {
        let mut total = 0;
        let mut node = HEAD;
        loop {
            total += self.node(node).levels[level].span;
            let forward = self.node(node).levels[level].forward;
            if forward == NIL {
                return total;
            }
            node = forward;
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Geometric level distribution with p = 1/4, capped at [`MAX_LEVEL`].
fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 1;
    while (rng.gen::<u32>() & 0xFFFF) < PROMOTE_THRESHOLD && level < MAX_LEVEL {
        level += 1;
    }
    level
}
