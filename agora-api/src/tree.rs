//! Threading of flat comment pages into reply forests.
//!
//! The persistence layer hands out comments as a flat list, already filtered
//! to a single discussion and already sorted in display order. This module
//! regroups such a list into nested replies without ever reordering it:
//! siblings keep their relative input order, at every depth.

use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// Anything that can be threaded: it has an id, and maybe the id of the
/// record it replies to.
pub trait Threaded {
    type Id: Debug + Eq + Hash;

    fn id(&self) -> &Self::Id;

    /// `None` for top-level records
    fn parent_id(&self) -> Option<&Self::Id>;
}

impl<'a, T: Threaded> Threaded for &'a T {
    type Id = T::Id;

    fn id(&self) -> &T::Id {
        (**self).id()
    }

    fn parent_id(&self) -> Option<&T::Id> {
        (**self).parent_id()
    }
}

/// A record along with its direct replies, in input order
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode<T> {
    #[serde(flatten)]
    pub comment: T,
    pub replies: Vec<CommentNode<T>>,
}

impl<T> CommentNode<T> {
    pub fn new(comment: T) -> CommentNode<T> {
        CommentNode {
            comment,
            replies: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        self.walk().count()
    }

    /// 1 for a node without replies
    pub fn depth(&self) -> usize {
        self.walk().map(|(d, _)| d + 1).max().unwrap_or(1)
    }

    /// Pre-order walk of the subtree, yielding each record with its depth
    pub fn walk(&self) -> impl Iterator<Item = (usize, &T)> {
        let mut stack = vec![(0, self)];
        std::iter::from_fn(move || {
            let (depth, node) = stack.pop()?;
            stack.extend(node.replies.iter().rev().map(|r| (depth + 1, r)));
            Some((depth, &node.comment))
        })
    }

    /// Turns the subtree back into a flat list, in pre-order
    pub fn flatten(self) -> Vec<T> {
        let mut res = Vec::with_capacity(self.node_count());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            res.push(node.comment);
            stack.extend(node.replies.into_iter().rev());
        }
        res
    }
}

/// Total number of nodes in a forest, at every depth
pub fn forest_size<T>(forest: &[CommentNode<T>]) -> usize {
    forest.iter().map(|n| n.node_count()).sum()
}

/// Where to put records whose parent is not part of the threaded batch
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize,
)]
pub enum OrphanPlacement {
    /// After all the genuine top-level records, keeping their relative order
    #[default]
    AppendAfterRoots,

    /// Among the top-level records, at their original position
    Interleave,
}

/// Configurable entry point for threading; see `build_tree` for the defaults
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeBuilder {
    pub orphans: OrphanPlacement,
}

impl TreeBuilder {
    pub fn new(orphans: OrphanPlacement) -> TreeBuilder {
        TreeBuilder { orphans }
    }

    /// Threads `records` into a forest.
    ///
    /// Every record ends up exactly once in the result. Records whose parent
    /// is missing from `records` are promoted to the top level, as their
    /// parent may just live on another page. If an id is used more than once,
    /// all the records using it are kept, and replies go to the last one.
    pub fn build<T, I>(&self, records: I) -> Vec<CommentNode<T>>
    where
        T: Threaded,
        I: IntoIterator<Item = T>,
    {
        let records = records.into_iter().collect::<Vec<T>>();

        let (roots, replies) = {
            let mut index = HashMap::with_capacity(records.len());
            for (i, r) in records.iter().enumerate() {
                if index.insert(r.id(), i).is_some() {
                    tracing::warn!(id = ?r.id(), "duplicate id while building comment tree");
                }
            }

            let mut roots = Vec::new();
            let mut orphans = Vec::new();
            let mut replies = vec![Vec::new(); records.len()];
            for (i, r) in records.iter().enumerate() {
                match r.parent_id().map(|p| index.get(p)) {
                    None => roots.push(i),
                    Some(Some(&parent)) if parent != i => replies[parent].push(i),
                    Some(_) => match self.orphans {
                        OrphanPlacement::AppendAfterRoots => orphans.push(i),
                        OrphanPlacement::Interleave => roots.push(i),
                    },
                }
            }
            roots.extend(orphans);
            (roots, replies)
        };

        let mut slots = records.into_iter().map(Some).collect::<Vec<_>>();
        let mut forest = Vec::with_capacity(roots.len());
        for r in roots {
            if let Some(comment) = slots[r].take() {
                forest.push(assemble(comment, r, &mut slots, &replies));
            }
        }

        // Only records caught in a parent cycle are left over at this point
        for r in 0..slots.len() {
            if let Some(comment) = slots[r].take() {
                tracing::warn!(id = ?comment.id(), "comment is part of a parent cycle");
                forest.push(assemble(comment, r, &mut slots, &replies));
            }
        }

        forest
    }
}

/// Threads `records` with the default orphan placement
pub fn build_tree<T, I>(records: I) -> Vec<CommentNode<T>>
where
    T: Threaded,
    I: IntoIterator<Item = T>,
{
    TreeBuilder::default().build(records)
}

/// Builds the subtree rooted at `root`, taking each record out of `slots` so
/// that it cannot be attached twice
fn assemble<T>(
    root: T,
    root_idx: usize,
    slots: &mut [Option<T>],
    replies: &[Vec<usize>],
) -> CommentNode<T> {
    let mut current = (CommentNode::new(root), replies[root_idx].iter());
    let mut parents = Vec::new();
    loop {
        match current.1.next() {
            Some(&child) => {
                if let Some(comment) = slots[child].take() {
                    let child = (CommentNode::new(comment), replies[child].iter());
                    parents.push(std::mem::replace(&mut current, child));
                }
            }
            None => match parents.pop() {
                Some(parent) => {
                    let (done, _) = std::mem::replace(&mut current, parent);
                    current.0.replies.push(done);
                }
                None => return current.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
    struct Rec {
        id: String,
        parent: Option<String>,
        likes: u32,
    }

    impl Threaded for Rec {
        type Id = String;

        fn id(&self) -> &String {
            &self.id
        }

        fn parent_id(&self) -> Option<&String> {
            self.parent.as_ref()
        }
    }

    fn rec(id: &str, parent: Option<&str>) -> Rec {
        Rec {
            id: String::from(id),
            parent: parent.map(String::from),
            likes: 0,
        }
    }

    /// Renders a forest as `A(B C(D)) E` for readable assertions
    fn shape<T: Threaded<Id = String>>(forest: &[CommentNode<T>]) -> String {
        forest
            .iter()
            .map(|n| match n.replies.is_empty() {
                true => n.comment.id().clone(),
                false => format!("{}({})", n.comment.id(), shape(&n.replies)),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_input() {
        assert_eq!(build_tree(Vec::<Rec>::new()), Vec::new());
    }

    #[test]
    fn reply_is_attached_to_parent() {
        let forest = build_tree(vec![
            rec("A", None),
            rec("B", Some("A")),
            rec("C", None),
        ]);
        assert_eq!(shape(&forest), "A(B) C");
        assert_eq!(
            forest,
            vec![
                CommentNode {
                    comment: rec("A", None),
                    replies: vec![CommentNode::new(rec("B", Some("A")))],
                },
                CommentNode::new(rec("C", None)),
            ]
        );
    }

    #[test]
    fn branches_resume_after_deep_subtrees() {
        let forest = build_tree(vec![
            rec("A", None),
            rec("B", Some("A")),
            rec("C", Some("B")),
            rec("D", Some("B")),
            rec("E", Some("D")),
            rec("F", Some("A")),
            rec("G", None),
            rec("H", Some("G")),
        ]);
        assert_eq!(shape(&forest), "A(B(C D(E)) F) G(H)");
        assert_eq!(forest_size(&forest), 8);
    }

    #[test]
    fn missing_parent_is_promoted() {
        let forest = build_tree(vec![rec("X", Some("ghost"))]);
        assert_eq!(forest, vec![CommentNode::new(rec("X", Some("ghost")))]);
    }

    #[test]
    fn child_before_parent() {
        let forest = build_tree(vec![rec("B", Some("A")), rec("A", None)]);
        assert_eq!(shape(&forest), "A(B)");
    }

    #[test]
    fn siblings_keep_input_order() {
        let forest = build_tree(vec![
            rec("P", None),
            rec("C", Some("P")),
            rec("A", Some("P")),
            rec("B", Some("P")),
        ]);
        assert_eq!(shape(&forest), "P(C A B)");
    }

    #[test]
    fn orphans_go_after_roots_by_default() {
        let records = vec![
            rec("O1", Some("ghost")),
            rec("A", None),
            rec("O2", Some("other-ghost")),
            rec("B", None),
        ];
        assert_eq!(shape(&build_tree(records.clone())), "A B O1 O2");
        assert_eq!(
            shape(&TreeBuilder::new(OrphanPlacement::Interleave).build(records)),
            "O1 A O2 B"
        );
    }

    #[test]
    fn replies_to_orphans_stay_nested() {
        let forest = build_tree(vec![
            rec("R", Some("O")),
            rec("A", None),
            rec("O", Some("ghost")),
        ]);
        assert_eq!(shape(&forest), "A O(R)");
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let n = 10_000;
        let records = (0..n)
            .map(|i| Rec {
                id: format!("{i}"),
                parent: (i > 0).then(|| format!("{}", i - 1)),
                likes: 0,
            })
            .collect::<Vec<_>>();
        let forest = build_tree(records.clone());
        assert_eq!(forest.len(), 1);
        assert_eq!(forest_size(&forest), n);
        let flat = forest.into_iter().next().unwrap().flatten();
        assert_eq!(flat, records);
    }

    #[test]
    fn duplicate_ids_are_all_kept() {
        let forest = build_tree(vec![
            rec("A", None),
            rec("A", None),
            rec("B", Some("A")),
        ]);
        assert_eq!(forest_size(&forest), 3);
        assert_eq!(shape(&forest), "A A(B)");
    }

    #[test]
    fn cycles_terminate_without_loss() {
        let forest = build_tree(vec![
            rec("A", Some("B")),
            rec("B", Some("A")),
            rec("S", Some("S")),
            rec("R", None),
        ]);
        assert_eq!(forest_size(&forest), 4);
        assert_eq!(shape(&forest), "R S A(B)");
    }

    #[test]
    fn borrowed_records_can_be_threaded() {
        let records = vec![rec("A", None), rec("B", Some("A"))];
        let forest = build_tree(&records);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].comment, &records[0]);
        assert_eq!(forest[0].replies[0].comment, &records[1]);
    }

    #[test]
    fn node_helpers() {
        let forest = build_tree(vec![
            rec("A", None),
            rec("B", Some("A")),
            rec("C", Some("B")),
            rec("D", Some("A")),
        ]);
        assert_eq!(forest[0].node_count(), 4);
        assert_eq!(forest[0].depth(), 3);
        assert_eq!(
            forest[0]
                .walk()
                .map(|(d, c)| format!("{d}{}", c.id))
                .collect::<Vec<_>>(),
            vec!["0A", "1B", "2C", "1D"]
        );
    }

    #[test]
    fn serializes_replies_next_to_record_fields() {
        let forest = build_tree(vec![rec("A", None), rec("B", Some("A"))]);
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "id": "A",
                "parent": null,
                "likes": 0,
                "replies": [{
                    "id": "B",
                    "parent": "A",
                    "likes": 0,
                    "replies": [],
                }],
            }])
        );
        let back: Vec<CommentNode<Rec>> = serde_json::from_value(json).unwrap();
        assert_eq!(back, forest);
    }

    // Property checks

    #[derive(Clone, Debug, bolero::generator::TypeGenerator)]
    struct FuzzRecord {
        parent: Option<u16>,
        ghost_parent: bool,
        sort_key: u8,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    struct Num {
        id: u32,
        parent: Option<u32>,
    }

    impl Threaded for Num {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }

        fn parent_id(&self) -> Option<&u32> {
            self.parent.as_ref()
        }
    }

    const GHOST_BASE: u32 = 1_000_000;

    /// Parents always point to an earlier-created record or to a ghost, and
    /// the page is then shuffled like an engagement-sorted page would be
    fn acyclic_page(fuzz: Vec<FuzzRecord>) -> Vec<Num> {
        let mut records = fuzz
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let parent = match (f.ghost_parent, f.parent) {
                    (_, None) => None,
                    (true, Some(p)) => Some(GHOST_BASE + p as u32),
                    (false, Some(_)) if i == 0 => None,
                    (false, Some(p)) => Some(p as u32 % i as u32),
                };
                (f.sort_key, Num { id: i as u32, parent })
            })
            .collect::<Vec<_>>();
        records.sort_by_key(|(k, _)| *k);
        records.into_iter().map(|(_, r)| r).collect()
    }

    fn check_forest(records: &[Num], forest: &[CommentNode<Num>], orphans: OrphanPlacement) {
        let position = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect::<HashMap<_, _>>();
        let known = position.keys().copied().collect::<HashSet<_>>();

        // cardinality & no duplication
        assert_eq!(forest_size(forest), records.len());
        let mut seen = forest
            .iter()
            .flat_map(|n| n.walk().map(|(_, r)| r.id))
            .collect::<Vec<_>>();
        seen.sort();
        let mut expected = records.iter().map(|r| r.id).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(seen, expected);

        // roots are exactly the top-level records and the orphans
        let is_root = |r: &Num| r.parent.map(|p| !known.contains(&p)).unwrap_or(true);
        let root_ids = forest.iter().map(|n| n.comment.id).collect::<HashSet<_>>();
        for r in records {
            assert_eq!(root_ids.contains(&r.id), is_root(r), "record {r:?}");
        }

        // root order
        let positions = forest
            .iter()
            .map(|n| position[&n.comment.id])
            .collect::<Vec<_>>();
        match orphans {
            OrphanPlacement::Interleave => {
                assert!(positions.windows(2).all(|w| w[0] < w[1]));
            }
            OrphanPlacement::AppendAfterRoots => {
                let genuine = forest
                    .iter()
                    .take_while(|n| n.comment.parent.is_none())
                    .count();
                assert!(forest[genuine..].iter().all(|n| n.comment.parent.is_some()));
                assert!(positions[..genuine].windows(2).all(|w| w[0] < w[1]));
                assert!(positions[genuine..].windows(2).all(|w| w[0] < w[1]));
            }
        }

        // replies are attached to their parent, in input order
        let mut stack = forest.iter().collect::<Vec<_>>();
        while let Some(n) = stack.pop() {
            for r in &n.replies {
                assert_eq!(r.comment.parent, Some(n.comment.id));
            }
            let positions = n
                .replies
                .iter()
                .map(|r| position[&r.comment.id])
                .collect::<Vec<_>>();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            stack.extend(n.replies.iter());
        }
    }

    #[test]
    fn fuzz_acyclic_pages() {
        bolero::check!()
            .with_generator(bolero::generator::gen_with::<Vec<FuzzRecord>>().len(0..64usize))
            .cloned()
            .for_each(|fuzz| {
                let records = acyclic_page(fuzz);
                for orphans in [OrphanPlacement::AppendAfterRoots, OrphanPlacement::Interleave] {
                    let builder = TreeBuilder::new(orphans);
                    let forest = builder.build(records.clone());
                    check_forest(&records, &forest, orphans);
                    assert_eq!(forest, builder.build(records.clone()));
                }
            })
    }

    #[test]
    fn fuzz_arbitrary_parents_never_lose_records() {
        bolero::check!()
            .with_generator(bolero::generator::gen_with::<Vec<(u8, Option<u8>)>>().len(0..64usize))
            .cloned()
            .for_each(|fuzz| {
                // ids may repeat and parents may form cycles here
                let records = fuzz
                    .into_iter()
                    .map(|(id, parent)| Num {
                        id: (id % 32) as u32,
                        parent: parent.map(|p| (p % 40) as u32),
                    })
                    .collect::<Vec<_>>();
                let forest = build_tree(records.clone());
                assert_eq!(forest_size(&forest), records.len());
                let mut flat = forest
                    .into_iter()
                    .flat_map(|n| n.flatten())
                    .map(|r| (r.id, r.parent))
                    .collect::<Vec<_>>();
                let mut expected = records
                    .iter()
                    .map(|r| (r.id, r.parent))
                    .collect::<Vec<_>>();
                flat.sort();
                expected.sort();
                assert_eq!(flat, expected);
            })
    }
}
