//! # Sorted Sets
//!
//! Purpose: Implement the ordered-collection primitives behind the `Z*`
//! command family: add-or-update with policy flags, score/lex/rank range
//! queries, weighted set algebra, and bounded pops.
//!
//! ## Design Principles
//! 1. **Hybrid Layout**: A member map gives O(1) score lookup; a `BTreeSet`
//!    ordered by `(score, member)` gives sorted traversal and O(log n)
//!    insertion, mirroring the map-beside-order-index discipline of the
//!    in-memory engine.
//! 2. **Tie-Break By Member**: Every ordered output sorts primarily by
//!    score ascending and secondarily by member text.
//! 3. **Policy In One Place**: Flag validation (`NX` vs `GT`/`LT`, single
//!    pair for `INCR`) lives next to the update rules it guards.

use std::collections::btree_set;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use ckv_common::{KvError, KvResult};

/// Existing-member policy for add-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Insert new members and update existing ones.
    Always,
    /// Only insert members that do not exist yet (`NX`).
    OnlyIfAbsent,
    /// Only update members that already exist (`XX`).
    OnlyIfPresent,
}

/// Score comparison gate for add-or-update (`GT` / `LT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// No gate; the new score always wins.
    None,
    /// Replace only when the new score is strictly greater.
    Greater,
    /// Replace only when the new score is strictly less.
    Less,
}

/// Combiner for weighted set algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Sum of weighted scores (default).
    Sum,
    /// Minimum weighted score.
    Min,
    /// Maximum weighted score.
    Max,
}

/// Options controlling one add-or-update call.
#[derive(Debug, Clone, Copy)]
pub struct AddOptions {
    pub policy: UpdatePolicy,
    pub comparison: Comparison,
    /// Count updated members in addition to added ones (`CH`).
    pub changed: bool,
    /// Treat the single pair's score as a delta (`INCR`).
    pub incr: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        AddOptions {
            policy: UpdatePolicy::Always,
            comparison: Comparison::None,
            changed: false,
            incr: false,
        }
    }
}

/// Outcome of one add-or-update call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddResult {
    /// Members created by this call.
    pub added: usize,
    /// Members whose score actually changed.
    pub updated: usize,
    /// Resulting score in `INCR` mode; `None` when the policy or the
    /// comparison gate blocked the update.
    pub incr_score: Option<f64>,
}

/// Unique string members, each carrying a float score, ordered by
/// `(score, member)`.
///
/// Scores persist as text because JSON has no representation for `±inf`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct SortedSet {
    members: HashMap<String, f64>,
    order: BTreeSet<(OrderedFloat<f64>, String)>,
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
    }
}

impl From<Vec<(String, f64)>> for SortedSet {
    fn from(pairs: Vec<(String, f64)>) -> Self {
        let mut set = SortedSet::default();
        for (member, score) in pairs {
            set.insert(member, score);
        }
        set
    }
}

impl From<SortedSet> for Vec<(String, f64)> {
    fn from(set: SortedSet) -> Self {
        set.order
            .into_iter()
            .map(|(score, member)| (member, score.0))
            .collect()
    }
}

impl TryFrom<Vec<(String, String)>> for SortedSet {
    type Error = KvError;

    fn try_from(pairs: Vec<(String, String)>) -> KvResult<Self> {
        let mut set = SortedSet::default();
        for (member, score) in pairs {
            set.insert(member, parse_score(&score)?);
        }
        Ok(set)
    }
}

impl From<SortedSet> for Vec<(String, String)> {
    fn from(set: SortedSet) -> Self {
        set.order
            .into_iter()
            .map(|(score, member)| (member, score.0.to_string()))
            .collect()
    }
}

impl SortedSet {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true when `member` is present.
    pub fn contains(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }

    /// Score of `member`, if present.
    pub fn score(&self, member: &str) -> Option<f64> {
        self.members.get(member).copied()
    }

    /// Iterates `(member, score)` in `(score, member)` order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.order.iter(),
        }
    }

    /// Inserts or replaces a member. Returns true when the member is new.
    pub fn insert(&mut self, member: String, score: f64) -> bool {
        match self.members.insert(member.clone(), score) {
            Some(old) => {
                self.order.remove(&(OrderedFloat(old), member.clone()));
                self.order.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.order.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    /// Removes a member, returning its score.
    pub fn remove(&mut self, member: &str) -> Option<f64> {
        let score = self.members.remove(member)?;
        self.order.remove(&(OrderedFloat(score), member.to_string()));
        Some(score)
    }

    /// Adds or updates members under the given policy flags.
    ///
    /// Rules:
    /// - `OnlyIfAbsent` cannot combine with `Greater`/`Less`.
    /// - `incr` requires exactly one pair; the score becomes the current
    ///   score plus the delta, with `±inf` absorbing.
    /// - `Greater` replaces only a strictly smaller current score, `Less`
    ///   only a strictly larger one.
    pub fn add(&mut self, pairs: &[(String, f64)], opts: &AddOptions) -> KvResult<AddResult> {
        if opts.policy == UpdatePolicy::OnlyIfAbsent && opts.comparison != Comparison::None {
            return Err(KvError::Conflict(
                "GT, LT, and NX options are mutually exclusive".to_string(),
            ));
        }
        if opts.incr && pairs.len() != 1 {
            return Err(KvError::Conflict(
                "INCR option supports a single score-member pair".to_string(),
            ));
        }

        let mut result = AddResult {
            added: 0,
            updated: 0,
            incr_score: None,
        };

        for (member, score) in pairs {
            let current = self.score(member);
            let candidate = if opts.incr {
                let base = current.unwrap_or(0.0);
                let sum = base + score;
                if sum.is_nan() {
                    return Err(KvError::Parse(
                        "resulting score is not a number (NaN)".to_string(),
                    ));
                }
                sum
            } else {
                *score
            };

            match current {
                Some(old) => {
                    if opts.policy == UpdatePolicy::OnlyIfAbsent {
                        continue;
                    }
                    let blocked = match opts.comparison {
                        Comparison::None => false,
                        Comparison::Greater => candidate <= old,
                        Comparison::Less => candidate >= old,
                    };
                    if blocked {
                        continue;
                    }
                    if candidate != old {
                        self.insert(member.clone(), candidate);
                        result.updated += 1;
                    }
                    if opts.incr {
                        result.incr_score = Some(candidate);
                    }
                }
                None => {
                    if opts.policy == UpdatePolicy::OnlyIfPresent {
                        continue;
                    }
                    self.insert(member.clone(), candidate);
                    result.added += 1;
                    if opts.incr {
                        result.incr_score = Some(candidate);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Rank-based range with negative-index mapping, inclusive on both ends.
    ///
    /// `rev` linearizes by score descending before indexing.
    pub fn range_by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<(String, f64)> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let start = (if start < 0 { start + len } else { start }).max(0);
        let stop = (if stop < 0 { stop + len } else { stop }).min(len - 1);
        if start > stop || start >= len || stop < 0 {
            return Vec::new();
        }
        let skip = start as usize;
        let take = (stop - start + 1) as usize;
        if rev {
            self.order
                .iter()
                .rev()
                .skip(skip)
                .take(take)
                .map(|(score, member)| (member.clone(), score.0))
                .collect()
        } else {
            self.order
                .iter()
                .skip(skip)
                .take(take)
                .map(|(score, member)| (member.clone(), score.0))
                .collect()
        }
    }

    /// Inclusive score range, ordered ascending (descending when `rev`),
    /// trimmed by `offset`/`count`; a negative count runs through the end.
    pub fn range_by_score(
        &self,
        min: f64,
        max: f64,
        rev: bool,
        offset: usize,
        count: i64,
    ) -> Vec<(String, f64)> {
        if min > max {
            return Vec::new();
        }
        let lower = Bound::Included((OrderedFloat(min), String::new()));
        let mut items: Vec<(String, f64)> = self
            .order
            .range((lower, Bound::Unbounded))
            .take_while(|(score, _)| score.0 <= max)
            .map(|(score, member)| (member.clone(), score.0))
            .collect();
        if rev {
            items.reverse();
        }
        apply_limit(items, offset, count)
    }

    /// Inclusive lexicographic range; only meaningful when every member
    /// shares one score, otherwise empty.
    pub fn range_by_lex(
        &self,
        min: &str,
        max: &str,
        rev: bool,
        offset: usize,
        count: i64,
    ) -> Vec<(String, f64)> {
        let score = match self.uniform_score() {
            Some(score) => score,
            None => return Vec::new(),
        };
        if min > max {
            return Vec::new();
        }
        let lower = Bound::Included((OrderedFloat(score), min.to_string()));
        let upper = Bound::Included((OrderedFloat(score), max.to_string()));
        let mut items: Vec<(String, f64)> = self
            .order
            .range((lower, upper))
            .map(|(score, member)| (member.clone(), score.0))
            .collect();
        if rev {
            items.reverse();
        }
        apply_limit(items, offset, count)
    }

    /// 0-based rank of `member` by score ascending (descending when `rev`),
    /// with its score.
    pub fn rank(&self, member: &str, rev: bool) -> Option<(usize, f64)> {
        let score = self.score(member)?;
        let position = if rev {
            self.order.iter().rev().position(|(_, m)| m == member)
        } else {
            self.order.iter().position(|(_, m)| m == member)
        };
        position.map(|rank| (rank, score))
    }

    /// Pops up to `count` members with the lowest scores, in popped order.
    pub fn pop_min(&mut self, count: usize) -> Vec<(String, f64)> {
        let mut popped = Vec::new();
        while popped.len() < count {
            let member = match self.order.first() {
                Some((_, member)) => member.clone(),
                None => break,
            };
            if let Some(score) = self.remove(&member) {
                popped.push((member, score));
            }
        }
        popped
    }

    /// Pops up to `count` members with the highest scores, in popped order.
    pub fn pop_max(&mut self, count: usize) -> Vec<(String, f64)> {
        let mut popped = Vec::new();
        while popped.len() < count {
            let member = match self.order.last() {
                Some((_, member)) => member.clone(),
                None => break,
            };
            if let Some(score) = self.remove(&member) {
                popped.push((member, score));
            }
        }
        popped
    }

    /// Removes members with `min <= score <= max`, returning the count.
    pub fn remove_range_by_score(&mut self, min: f64, max: f64) -> usize {
        let doomed: Vec<String> = self
            .range_by_score(min, max, false, 0, -1)
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Removes members by linearized index.
    ///
    /// Negative indices count from the tail; indices that remain outside
    /// the set after mapping are an error.
    pub fn remove_range_by_rank(&mut self, start: i64, stop: i64) -> KvResult<usize> {
        let len = self.len() as i64;
        let mapped_start = if start < 0 { start + len } else { start };
        let mapped_stop = if stop < 0 { stop + len } else { stop };
        if mapped_start < 0 || mapped_stop < 0 || mapped_start >= len || mapped_stop >= len {
            return Err(KvError::OutOfRange(format!("rank {} {}", start, stop)));
        }
        if mapped_start > mapped_stop {
            return Ok(0);
        }
        let doomed: Vec<String> = self
            .range_by_rank(mapped_start, mapped_stop, false)
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        Ok(doomed.len())
    }

    /// Removes members in the lexicographic range; a no-op returning 0
    /// when scores are not uniform.
    pub fn remove_range_by_lex(&mut self, min: &str, max: &str) -> usize {
        let doomed: Vec<String> = self
            .range_by_lex(min, max, false, 0, -1)
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        for member in &doomed {
            self.remove(member);
        }
        doomed.len()
    }

    /// Union across weighted inputs; every distinct member appears with
    /// the aggregate of its weighted scores.
    pub fn union_of(inputs: &[(&SortedSet, f64)], aggregate: Aggregate) -> SortedSet {
        let mut combined: HashMap<String, f64> = HashMap::new();
        for (set, weight) in inputs {
            for (member, score) in set.iter() {
                let effective = weighted(score, *weight);
                combined
                    .entry(member.to_string())
                    .and_modify(|acc| *acc = combine(*acc, effective, aggregate))
                    .or_insert(effective);
            }
        }
        combined.into_iter().collect::<Vec<_>>().into()
    }

    /// Intersection across weighted inputs; only members present in every
    /// input survive, with scores aggregated as in union.
    pub fn intersection_of(inputs: &[(&SortedSet, f64)], aggregate: Aggregate) -> SortedSet {
        let (first, first_weight) = match inputs.first() {
            Some(first) => *first,
            None => return SortedSet::default(),
        };
        let mut result = SortedSet::default();
        for (member, score) in first.iter() {
            let mut acc = weighted(score, first_weight);
            let mut everywhere = true;
            for (set, weight) in &inputs[1..] {
                match set.score(member) {
                    Some(other) => acc = combine(acc, weighted(other, *weight), aggregate),
                    None => {
                        everywhere = false;
                        break;
                    }
                }
            }
            if everywhere {
                result.insert(member.to_string(), acc);
            }
        }
        result
    }

    /// Members of the first input absent from all the others; the first
    /// input's weight applies, the rest only filter.
    pub fn difference_of(inputs: &[(&SortedSet, f64)]) -> SortedSet {
        let (first, first_weight) = match inputs.first() {
            Some(first) => *first,
            None => return SortedSet::default(),
        };
        let mut result = SortedSet::default();
        for (member, score) in first.iter() {
            if inputs[1..].iter().any(|(set, _)| set.contains(member)) {
                continue;
            }
            result.insert(member.to_string(), weighted(score, first_weight));
        }
        result
    }

    /// The single score shared by every member, when uniform.
    fn uniform_score(&self) -> Option<f64> {
        let first = self.order.first()?;
        let last = self.order.last()?;
        if first.0 == last.0 {
            Some(first.0 .0)
        } else {
            None
        }
    }
}

/// Ordered iterator over `(member, score)` pairs.
pub struct Iter<'a> {
    inner: btree_set::Iter<'a, (OrderedFloat<f64>, String)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, f64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(score, member)| (member.as_str(), score.0))
    }
}

/// Parses a score argument; `+inf`/`-inf` (any case) are accepted, NaN is
/// rejected.
pub fn parse_score(raw: &str) -> KvResult<f64> {
    match raw.parse::<f64>() {
        Ok(score) if !score.is_nan() => Ok(score),
        _ => Err(KvError::Parse(format!(
            "value is not a valid float: '{}'",
            raw
        ))),
    }
}

fn apply_limit(items: Vec<(String, f64)>, offset: usize, count: i64) -> Vec<(String, f64)> {
    let trimmed = items.into_iter().skip(offset);
    if count < 0 {
        trimmed.collect()
    } else {
        trimmed.take(count as usize).collect()
    }
}

fn weighted(score: f64, weight: f64) -> f64 {
    let value = score * weight;
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

fn combine(left: f64, right: f64, aggregate: Aggregate) -> f64 {
    match aggregate {
        Aggregate::Sum => {
            let sum = left + right;
            // inf plus -inf aggregates to zero rather than poisoning the set.
            if sum.is_nan() {
                0.0
            } else {
                sum
            }
        }
        Aggregate::Min => left.min(right),
        Aggregate::Max => left.max(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(pairs: &[(&str, f64)]) -> SortedSet {
        pairs
            .iter()
            .map(|(member, score)| (member.to_string(), *score))
            .collect::<Vec<_>>()
            .into()
    }

    fn members(items: &[(String, f64)]) -> Vec<&str> {
        items.iter().map(|(member, _)| member.as_str()).collect()
    }

    #[test]
    fn ordering_breaks_ties_by_member() {
        let set = set_of(&[("b", 1.0), ("a", 1.0), ("c", 0.5)]);
        let all = set.range_by_rank(0, -1, false);
        assert_eq!(members(&all), ["c", "a", "b"]);
    }

    #[test]
    fn add_counts_added_and_updated() {
        let mut set = SortedSet::default();
        let pairs = vec![
            ("a".to_string(), 1.0),
            ("b".to_string(), 2.0),
            ("c".to_string(), 3.0),
        ];
        let result = set.add(&pairs, &AddOptions::default()).unwrap();
        assert_eq!(result.added, 3);

        // Same pairs again: nothing added, nothing changed.
        let result = set.add(&pairs, &AddOptions::default()).unwrap();
        assert_eq!((result.added, result.updated), (0, 0));

        let result = set
            .add(&[("a".to_string(), 9.0)], &AddOptions::default())
            .unwrap();
        assert_eq!((result.added, result.updated), (0, 1));
    }

    #[test]
    fn only_if_present_rejects_new_members() {
        let mut set = set_of(&[("a", 1.0)]);
        let opts = AddOptions {
            policy: UpdatePolicy::OnlyIfPresent,
            changed: true,
            ..AddOptions::default()
        };
        let result = set
            .add(
                &[("a".to_string(), 5.0), ("d".to_string(), 6.0)],
                &opts,
            )
            .unwrap();
        assert_eq!((result.added, result.updated), (0, 1));
        assert!(!set.contains("d"));
        assert_eq!(set.score("a"), Some(5.0));
    }

    #[test]
    fn nx_with_comparison_is_a_conflict() {
        let mut set = SortedSet::default();
        let opts = AddOptions {
            policy: UpdatePolicy::OnlyIfAbsent,
            comparison: Comparison::Greater,
            ..AddOptions::default()
        };
        let err = set.add(&[("a".to_string(), 1.0)], &opts).unwrap_err();
        assert!(matches!(err, KvError::Conflict(_)));
    }

    #[test]
    fn incr_requires_a_single_pair() {
        let mut set = SortedSet::default();
        let opts = AddOptions {
            incr: true,
            ..AddOptions::default()
        };
        let err = set
            .add(
                &[("a".to_string(), 1.0), ("b".to_string(), 2.0)],
                &opts,
            )
            .unwrap_err();
        assert!(matches!(err, KvError::Conflict(_)));
    }

    #[test]
    fn incr_adds_to_the_current_score() {
        let mut set = set_of(&[("a", 5.0)]);
        let opts = AddOptions {
            incr: true,
            ..AddOptions::default()
        };
        let result = set.add(&[("a".to_string(), 2.5)], &opts).unwrap();
        assert_eq!(result.incr_score, Some(7.5));
        assert_eq!(set.score("a"), Some(7.5));

        // Missing members start from zero.
        let result = set.add(&[("b".to_string(), -1.0)], &opts).unwrap();
        assert_eq!(result.incr_score, Some(-1.0));
    }

    #[test]
    fn incr_propagates_infinity_and_rejects_nan() {
        let mut set = set_of(&[("a", f64::INFINITY)]);
        let opts = AddOptions {
            incr: true,
            ..AddOptions::default()
        };
        let result = set.add(&[("a".to_string(), 1.0)], &opts).unwrap();
        assert_eq!(result.incr_score, Some(f64::INFINITY));

        let err = set
            .add(&[("a".to_string(), f64::NEG_INFINITY)], &opts)
            .unwrap_err();
        assert!(matches!(err, KvError::Parse(_)));
    }

    #[test]
    fn greater_only_raises_scores() {
        let mut set = set_of(&[("a", 5.0)]);
        let opts = AddOptions {
            comparison: Comparison::Greater,
            ..AddOptions::default()
        };
        set.add(&[("a".to_string(), 3.0)], &opts).unwrap();
        assert_eq!(set.score("a"), Some(5.0));
        set.add(&[("a".to_string(), 8.0)], &opts).unwrap();
        assert_eq!(set.score("a"), Some(8.0));
    }

    #[test]
    fn blocked_incr_returns_no_score() {
        let mut set = set_of(&[("a", 5.0)]);
        let opts = AddOptions {
            comparison: Comparison::Greater,
            incr: true,
            ..AddOptions::default()
        };
        let result = set.add(&[("a".to_string(), -1.0)], &opts).unwrap();
        assert_eq!(result.incr_score, None);
        assert_eq!(set.score("a"), Some(5.0));
    }

    #[test]
    fn rank_range_maps_negative_indices() {
        let set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        assert_eq!(members(&set.range_by_rank(0, -1, false)), ["a", "b", "c", "d"]);
        assert_eq!(members(&set.range_by_rank(-2, -1, false)), ["c", "d"]);
        assert_eq!(members(&set.range_by_rank(1, 2, true)), ["c", "b"]);
        assert!(set.range_by_rank(5, 9, false).is_empty());
    }

    #[test]
    fn score_range_is_inclusive_and_limited() {
        let set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]);
        assert_eq!(members(&set.range_by_score(2.0, 3.0, false, 0, -1)), ["b", "c"]);
        assert_eq!(
            members(&set.range_by_score(f64::NEG_INFINITY, f64::INFINITY, false, 1, 2)),
            ["b", "c"]
        );
        assert_eq!(members(&set.range_by_score(1.0, 4.0, true, 0, 2)), ["d", "c"]);
        assert!(set.range_by_score(5.0, 1.0, false, 0, -1).is_empty());
    }

    #[test]
    fn offset_past_cardinality_is_empty() {
        let set = set_of(&[("a", 1.0), ("b", 2.0)]);
        assert!(set
            .range_by_score(f64::NEG_INFINITY, f64::INFINITY, false, 10, -1)
            .is_empty());
    }

    #[test]
    fn lex_range_requires_uniform_scores() {
        let uniform = set_of(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        assert_eq!(members(&uniform.range_by_lex("a", "b", false, 0, -1)), ["a", "b"]);
        assert_eq!(members(&uniform.range_by_lex("a", "c", true, 0, 2)), ["c", "b"]);

        let mixed = set_of(&[("a", 1.0), ("b", 2.0)]);
        assert!(mixed.range_by_lex("a", "b", false, 0, -1).is_empty());
    }

    #[test]
    fn rank_reports_both_directions() {
        let set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.rank("a", false), Some((0, 1.0)));
        assert_eq!(set.rank("a", true), Some((2, 1.0)));
        assert_eq!(set.rank("missing", false), None);
    }

    #[test]
    fn pops_remove_in_order() {
        let mut set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.pop_min(2), vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        assert_eq!(set.pop_max(5), vec![("c".to_string(), 3.0)]);
        assert!(set.is_empty());
    }

    #[test]
    fn remove_by_rank_validates_bounds() {
        let mut set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert!(set.remove_range_by_rank(0, 5).is_err());
        assert!(set.remove_range_by_rank(-9, 0).is_err());
        assert_eq!(set.remove_range_by_rank(-2, -1).unwrap(), 2);
        assert_eq!(set.len(), 1);
        assert!(set.contains("a"));
    }

    #[test]
    fn remove_by_score_and_lex() {
        let mut set = set_of(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(set.remove_range_by_score(2.0, 3.0), 2);
        assert_eq!(set.len(), 1);

        let mut uniform = set_of(&[("a", 0.0), ("b", 0.0), ("c", 0.0)]);
        assert_eq!(uniform.remove_range_by_lex("a", "b"), 2);

        let mut mixed = set_of(&[("a", 1.0), ("b", 2.0)]);
        assert_eq!(mixed.remove_range_by_lex("a", "b"), 0);
        assert_eq!(mixed.len(), 2);
    }

    #[test]
    fn union_applies_weights_and_aggregate() {
        let a = set_of(&[("x", 1.0), ("y", 2.0)]);
        let b = set_of(&[("y", 3.0), ("z", 4.0)]);
        let union = SortedSet::union_of(&[(&a, 2.0), (&b, 1.0)], Aggregate::Max);
        assert_eq!(union.len(), 3);
        assert_eq!(union.score("x"), Some(2.0));
        assert_eq!(union.score("y"), Some(4.0));
        assert_eq!(union.score("z"), Some(4.0));
        // Tie on y and z breaks by member text.
        let ordered = union.range_by_rank(0, -1, false);
        assert_eq!(members(&ordered), ["x", "y", "z"]);
    }

    #[test]
    fn intersection_keeps_common_members_only() {
        let a = set_of(&[("x", 1.0), ("y", 2.0)]);
        let b = set_of(&[("y", 3.0), ("z", 4.0)]);
        let inter = SortedSet::intersection_of(&[(&a, 1.0), (&b, 1.0)], Aggregate::Sum);
        assert_eq!(inter.len(), 1);
        assert_eq!(inter.score("y"), Some(5.0));
    }

    #[test]
    fn difference_carries_first_set_scores() {
        let a = set_of(&[("x", 1.0), ("y", 2.0), ("w", 9.0)]);
        let b = set_of(&[("y", 3.0)]);
        let diff = SortedSet::difference_of(&[(&a, 2.0), (&b, 1.0)]);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff.score("x"), Some(2.0));
        assert_eq!(diff.score("w"), Some(18.0));
    }

    #[test]
    fn opposing_infinities_aggregate_to_zero() {
        let a = set_of(&[("x", f64::INFINITY)]);
        let b = set_of(&[("x", f64::NEG_INFINITY)]);
        let union = SortedSet::union_of(&[(&a, 1.0), (&b, 1.0)], Aggregate::Sum);
        assert_eq!(union.score("x"), Some(0.0));
    }

    #[test]
    fn score_parsing_accepts_infinities() {
        assert_eq!(parse_score("2.5").unwrap(), 2.5);
        assert_eq!(parse_score("+inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_score("-INF").unwrap(), f64::NEG_INFINITY);
        assert!(parse_score("nan").is_err());
        assert!(parse_score("ten").is_err());
    }

    #[test]
    fn serde_round_trips_through_pairs() {
        let set = set_of(&[("a", 1.5), ("b", f64::NEG_INFINITY)]);
        let pairs: Vec<(String, f64)> = set.clone().into();
        let back: SortedSet = pairs.into();
        assert_eq!(back, set);
    }

    #[test]
    fn json_preserves_infinite_scores() {
        let set = set_of(&[("a", 0.25), ("b", f64::INFINITY)]);
        let json = serde_json::to_string(&set).unwrap();
        let back: SortedSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.score("b"), Some(f64::INFINITY));
        assert_eq!(back, set);
    }
}
