use crate::types::border::ScoreBorder;
use crate::types::skiplist::{Element, SkipList};
use std::collections::HashMap;

/// Sorted set: a member index for O(1) score lookup plus a span-accounted
/// skiplist for ordered and rank queries. The two structures always agree on
/// every member's score.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    dict: HashMap<String, f64>,
    skiplist: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.dict.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Insert or update a member. Returns `true` only when the member was
    /// new. A score change reinserts the skiplist node so ordering holds.
    pub fn add(&mut self, member: &str, score: f64) -> bool {
        match self.dict.insert(member.to_string(), score) {
            Some(old_score) => {
                if old_score != score {
                    self.skiplist.remove(member, old_score);
                    self.skiplist.insert(member.to_string(), score);
                }
                false
            }
            None => {
                self.skiplist.insert(member.to_string(), score);
                true
            }
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.dict.get(member).copied()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.dict.contains_key(member)
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.dict.remove(member) {
            Some(score) => {
                self.skiplist.remove(member, score);
                true
            }
            None => false,
        }
    }

    /// 0-based rank of a member, counted from the low end (`desc == false`)
    /// or the high end (`desc == true`).
    pub fn rank(&self, member: &str, desc: bool) -> Option<u64> {
        let score = *self.dict.get(member)?;
        let rank = self.skiplist.rank_of(member, score);
        if desc {
            Some(self.skiplist.len() - rank)
        } else {
            Some(rank - 1)
        }
    }

    /// Visit elements with 0-based ranks in `[start, end)` in the requested
    /// direction. Out-of-range windows are clamped to the set size.
    pub fn for_each(
        &self,
        start: u64,
        end: u64,
        desc: bool,
        mut consumer: impl FnMut(&Element) -> bool,
    ) {
        let size = self.len();
        let start = start.min(size);
        let end = end.min(size);
        if start >= end {
            return;
        }

        let mut node = if desc {
            // Descending iteration begins at rank `size - start` from the
            // low end, i.e. the tail when start == 0.
            self.skiplist.node_by_rank(size - start)
        } else {
            self.skiplist.node_by_rank(start + 1)
        };

        let mut remaining = end - start;
        while remaining > 0 {
            let idx = match node {
                Some(idx) => idx,
                None => break,
            };
            if !consumer(&self.skiplist.element(idx)) {
                break;
            }
            node = if desc {
                self.skiplist.prev(idx)
            } else {
                self.skiplist.next(idx)
            };
            remaining -= 1;
        }
    }

    pub fn range(&self, start: u64, end: u64, desc: bool) -> Vec<Element> {
        let mut slice = Vec::new();
        self.for_each(start, end, desc, |element| {
            slice.push(element.clone());
            true
        });
        slice
    }

    pub fn count(&self, min: &ScoreBorder, max: &ScoreBorder) -> u64 {
        let mut count = 0;
        self.for_each(0, self.len(), false, |element| {
            if !min.less(element.score) {
                // below the range, keep scanning
                return true;
            }
            if !max.greater(element.score) {
                // past the range, stop
                return false;
            }
            count += 1;
            true
        });
        count
    }

    /// Visit elements whose scores fall within `[min, max]`, skipping
    /// `offset` and yielding at most `limit` (negative limit = unbounded).
    pub fn for_each_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        offset: u64,
        limit: i64,
        desc: bool,
        mut consumer: impl FnMut(&Element) -> bool,
    ) {
        let mut node = if desc {
            self.skiplist.last_in_range(min, max)
        } else {
            self.skiplist.first_in_range(min, max)
        };

        let mut to_skip = offset;
        while to_skip > 0 {
            node = match node {
                Some(idx) if desc => self.skiplist.prev(idx),
                Some(idx) => self.skiplist.next(idx),
                None => return,
            };
            to_skip -= 1;
        }

        let mut yielded: i64 = 0;
        while let Some(idx) = node {
            if limit >= 0 && yielded >= limit {
                break;
            }
            let element = self.skiplist.element(idx);
            if !min.less(element.score) || !max.greater(element.score) {
                break;
            }
            if !consumer(&element) {
                break;
            }
            yielded += 1;
            node = if desc {
                self.skiplist.prev(idx)
            } else {
                self.skiplist.next(idx)
            };
        }
    }

    pub fn range_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        offset: u64,
        limit: i64,
        desc: bool,
    ) -> Vec<Element> {
        let mut slice = Vec::new();
        if limit == 0 {
            return slice;
        }
        self.for_each_by_score(min, max, offset, limit, desc, |element| {
            slice.push(element.clone());
            true
        });
        slice
    }

    pub fn remove_range_by_score(&mut self, min: &ScoreBorder, max: &ScoreBorder) -> usize {
        let removed = self.skiplist.remove_range_by_score(min, max, 0);
        for element in &removed {
            self.dict.remove(&element.member);
        }
        removed.len()
    }

    /// Remove elements with 0-based ranks in `[start, end)`.
    pub fn remove_range_by_rank(&mut self, start: u64, end: u64) -> usize {
        let removed = self.skiplist.remove_range_by_rank(start + 1, end + 1);
        for element in &removed {
            self.dict.remove(&element.member);
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SortedSet {
        let mut set = SortedSet::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            assert!(set.add(member, score));
        }
        set
    }

    #[test]
    fn add_reports_new_members_only() {
        let mut set = SortedSet::new();
        assert!(set.add("a", 1.0));
        assert!(!set.add("a", 1.0));
        assert!(!set.add("a", 9.0));
        assert_eq!(set.score("a"), Some(9.0));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn score_update_keeps_ordering() {
        let mut set = sample();
        set.add("a", 10.0);
        let members: Vec<_> = set
            .range(0, set.len(), false)
            .into_iter()
            .map(|e| e.member)
            .collect();
        assert_eq!(members, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn ranks_in_both_directions() {
        let set = sample();
        assert_eq!(set.rank("a", false), Some(0));
        assert_eq!(set.rank("d", false), Some(3));
        assert_eq!(set.rank("d", true), Some(0));
        assert_eq!(set.rank("a", true), Some(3));
        assert_eq!(set.rank("missing", false), None);
    }

    #[test]
    fn range_windows_are_clamped() {
        let set = sample();
        let members: Vec<_> = set.range(1, 3, false).into_iter().map(|e| e.member).collect();
        assert_eq!(members, vec!["b", "c"]);

        let members: Vec<_> = set.range(0, 2, true).into_iter().map(|e| e.member).collect();
        assert_eq!(members, vec!["d", "c"]);

        assert!(set.range(9, 12, false).is_empty());
        let members: Vec<_> = set
            .range(2, 100, false)
            .into_iter()
            .map(|e| e.member)
            .collect();
        assert_eq!(members, vec!["c", "d"]);
    }

    #[test]
    fn range_by_score_with_offset_and_limit() {
        let set = sample();
        let all = set.range_by_score(
            &ScoreBorder::inclusive(2.0),
            &ScoreBorder::inclusive(4.0),
            0,
            -1,
            false,
        );
        let members: Vec<_> = all.into_iter().map(|e| e.member).collect();
        assert_eq!(members, vec!["b", "c", "d"]);

        let limited = set.range_by_score(
            &ScoreBorder::inclusive(2.0),
            &ScoreBorder::inclusive(4.0),
            1,
            1,
            false,
        );
        let members: Vec<_> = limited.into_iter().map(|e| e.member).collect();
        assert_eq!(members, vec!["c"]);

        let descending = set.range_by_score(&ScoreBorder::NegInf, &ScoreBorder::PosInf, 0, -1, true);
        let members: Vec<_> = descending.into_iter().map(|e| e.member).collect();
        assert_eq!(members, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn count_respects_exclusive_borders() {
        let set = sample();
        assert_eq!(
            set.count(&ScoreBorder::inclusive(2.0), &ScoreBorder::inclusive(3.0)),
            2
        );
        assert_eq!(
            set.count(&ScoreBorder::exclusive(2.0), &ScoreBorder::inclusive(3.0)),
            1
        );
        assert_eq!(set.count(&ScoreBorder::NegInf, &ScoreBorder::PosInf), 4);
    }

    #[test]
    fn remove_range_by_rank_shrinks_by_window_size() {
        let mut set = sample();
        assert_eq!(set.remove_range_by_rank(1, 3), 2);
        assert_eq!(set.len(), 2);
        assert!(!set.contains("b"));
        assert!(!set.contains("c"));
        assert_eq!(set.rank("d", false), Some(1));
    }

    #[test]
    fn remove_range_by_score_clears_both_indexes() {
        let mut set = sample();
        assert_eq!(
            set.remove_range_by_score(&ScoreBorder::inclusive(2.0), &ScoreBorder::inclusive(3.0)),
            2
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.score("b"), None);
        assert_eq!(set.rank("d", false), Some(1));
    }
}
