//! Tree compressor: rewrites a strategy tree into a smaller, semantically
//! equivalent tree and precomputes per-node analysis metadata.
//!
//! Mirrors the tagged-variant dispatch used throughout the risk policy engine
//! this crate was grounded on: every traversal is an exhaustive match over
//! [`Node`], so adding a new node kind is a compile error here until every
//! site is updated.

use crate::error::{CoreError, CoreResult};
use crate::types::{CompressionStats, EvaluationMode, Node, PostProcess, Slots, Ticker, Tree, Weighting};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// A tree that has been pruned, collapsed, and gate-merged, with analysis
/// metadata precomputed for the evaluator.
#[derive(Debug, Clone)]
pub struct CompressedTree {
    pub root: Node,
    /// Node id -> tickers reachable from that node's output or conditions.
    pub ticker_locations: HashMap<String, HashSet<Ticker>>,
    /// Node ids whose output does not depend on the evaluation date.
    pub static_nodes: HashSet<String>,
    pub stats: CompressionStats,
}

/// Validate, prune, collapse, and gate-merge `tree`, then precompute ticker
/// locations and static-node membership. Deterministic: a given input tree
/// maps to exactly one output.
pub fn compress(tree: &Tree) -> CoreResult<CompressedTree> {
    validate(&tree.root)?;

    let original_nodes = count_nodes(&tree.root);

    let mut root = tree.root.clone();
    let mut gate_chains_merged = 0usize;

    // Pruning and gate-chain merging can each expose new opportunities for the
    // other, so iterate to a fixed point.
    loop {
        let pruned = prune_empty(&root);
        let before_ids = collect_ids(&root);
        root = match pruned {
            Some(node) => node,
            None => {
                // Whole tree pruned away; a strategy with zero active tickers
                // degrades to an all-cash root. Represent it as a degenerate
                // position with no tickers so the evaluator can special-case it.
                return Ok(CompressedTree {
                    root: Node::Position {
                        id: tree.root.id().to_string(),
                        tickers: vec![],
                        weighting: Weighting::Equal,
                    },
                    ticker_locations: HashMap::new(),
                    static_nodes: HashSet::new(),
                    stats: CompressionStats {
                        original_nodes,
                        compressed_nodes: 1,
                        nodes_removed: original_nodes.saturating_sub(1),
                        gate_chains_merged: 0,
                    },
                });
            }
        };
        root = collapse_single_children(root);

        let (merged_root, merged_this_pass) = merge_gate_chains(root);
        root = merged_root;
        gate_chains_merged += merged_this_pass;

        let after_ids = collect_ids(&root);
        if merged_this_pass == 0 && before_ids == after_ids {
            break;
        }
    }

    let compressed_nodes = count_nodes(&root);
    let mut ticker_locations = HashMap::new();
    compute_ticker_locations(&root, &mut ticker_locations);

    let mut static_nodes = HashSet::new();
    compute_static_nodes(&root, &mut static_nodes);

    Ok(CompressedTree {
        root,
        ticker_locations,
        static_nodes,
        stats: CompressionStats {
            original_nodes,
            compressed_nodes,
            nodes_removed: original_nodes.saturating_sub(compressed_nodes),
            gate_chains_merged,
        },
    })
}

/// Stable content-address for a strategy payload plus the evaluation
/// settings it's paired with, used as the result cache’s key: a
/// SHA-256 over the tree's canonical JSON followed by `mode`/`cost_bps`, so
/// two trees that differ only in settings never collide and the hash never
/// needs to be shared between a backtest and a sanity-report entry.
pub fn payload_hash(tree: &Tree, mode: EvaluationMode, cost_bps: f64) -> CoreResult<String> {
    let canonical = serde_json::to_vec(tree)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hasher.update(format!("{mode:?}|{cost_bps}").as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn validate(node: &Node) -> CoreResult<()> {
    match node {
        Node::Position { tickers, .. } => {
            if tickers.iter().all(|t| t == "Empty") && !tickers.is_empty() {
                // Pure placeholder position; legal pre-compression, pruned later.
            }
            Ok(())
        }
        Node::Basic { children, .. } => {
            if children.next.is_empty() {
                return Err(CoreError::StructuralError(
                    "basic node has no children in `next`".to_string(),
                ));
            }
            children.next.iter().try_for_each(validate)
        }
        Node::Indicator { children, .. } => {
            if let Some(then) = &children.then {
                validate(then)?;
            }
            if let Some(els) = &children.r#else {
                validate(els)?;
            }
            Ok(())
        }
        Node::Function { children, .. } => {
            if children.next.len() != 1 {
                return Err(CoreError::StructuralError(format!(
                    "function node {} requires exactly one child in `next`",
                    node.id()
                )));
            }
            validate(&children.next[0])
        }
    }
}

fn count_nodes(node: &Node) -> usize {
    1 + match node {
        Node::Position { .. } => 0,
        Node::Basic { children, .. } => children.next.iter().map(count_nodes).sum(),
        Node::Indicator { children, .. } => {
            children.then.as_deref().map(count_nodes).unwrap_or(0)
                + children.r#else.as_deref().map(count_nodes).unwrap_or(0)
        }
        Node::Function { children, .. } => children.next.iter().map(count_nodes).sum(),
    }
}

fn collect_ids(node: &Node) -> Vec<String> {
    let mut out = vec![node.id().to_string()];
    match node {
        Node::Position { .. } => {}
        Node::Basic { children, .. } => {
            for child in &children.next {
                out.extend(collect_ids(child));
            }
        }
        Node::Indicator { children, .. } => {
            if let Some(then) = &children.then {
                out.extend(collect_ids(then));
            }
            if let Some(els) = &children.r#else {
                out.extend(collect_ids(els));
            }
        }
        Node::Function { children, .. } => {
            for child in &children.next {
                out.extend(collect_ids(child));
            }
        }
    }
    out
}

/// A node is empty iff it is a `position` with no (non-`Empty`) tickers, or a
/// non-terminal whose every reachable descendant is empty.
fn is_empty(node: &Node) -> bool {
    match node {
        Node::Position { tickers, .. } => tickers.iter().all(|t| t == "Empty") || tickers.is_empty(),
        Node::Basic { children, .. } => children.next.iter().all(is_empty),
        Node::Indicator { children, .. } => {
            let then_empty = children.then.as_deref().map(is_empty).unwrap_or(true);
            let else_empty = children.r#else.as_deref().map(is_empty).unwrap_or(true);
            then_empty && else_empty
        }
        Node::Function { children, .. } => children.next.iter().all(is_empty),
    }
}

/// Drop empty children and remove nodes left with nothing active.
fn prune_empty(node: &Node) -> Option<Node> {
    match node {
        Node::Position { id, tickers, weighting } => {
            let live: Vec<String> = tickers.iter().filter(|t| t.as_str() != "Empty").cloned().collect();
            if live.is_empty() {
                None
            } else {
                Some(Node::Position { id: id.clone(), tickers: live, weighting: weighting.clone() })
            }
        }
        Node::Basic { id, weighting, children } => {
            let pruned_children: Vec<Node> = children.next.iter().filter_map(prune_empty).collect();
            if pruned_children.is_empty() {
                None
            } else {
                Some(Node::Basic {
                    id: id.clone(),
                    weighting: weighting.clone(),
                    children: Slots { next: pruned_children, then: None, r#else: None },
                })
            }
        }
        Node::Indicator { id, conditions, children } => {
            let then = children.then.as_deref().and_then(prune_empty).map(Box::new);
            let els = children.r#else.as_deref().and_then(prune_empty).map(Box::new);
            if then.is_none() && els.is_none() {
                None
            } else {
                Some(Node::Indicator {
                    id: id.clone(),
                    conditions: conditions.clone(),
                    children: Slots { next: vec![], then, r#else: els },
                })
            }
        }
        Node::Function { id, post_process, children } => {
            let pruned_children: Vec<Node> = children.next.iter().filter_map(prune_empty).collect();
            if pruned_children.is_empty() {
                None
            } else {
                Some(Node::Function {
                    id: id.clone(),
                    post_process: post_process.clone(),
                    children: Slots { next: pruned_children, then: None, r#else: None },
                })
            }
        }
    }
}

/// A `basic` node with equal weighting and exactly one child collapses into
/// that child. `function` nodes are never collapsed; their post-processing is
/// semantic even with a single child.
fn collapse_single_children(node: Node) -> Node {
    match node {
        Node::Basic { weighting, children, .. } if children.next.len() == 1 && weighting == Weighting::Equal => {
            let mut children = children;
            collapse_single_children(children.next.remove(0))
        }
        Node::Basic { id, weighting, children } => Node::Basic {
            id,
            weighting,
            children: Slots {
                next: children.next.into_iter().map(collapse_single_children).collect(),
                then: None,
                r#else: None,
            },
        },
        Node::Indicator { id, conditions, children } => Node::Indicator {
            id,
            conditions,
            children: Slots {
                next: vec![],
                then: children.then.map(|n| Box::new(collapse_single_children(*n))),
                r#else: children.r#else.map(|n| Box::new(collapse_single_children(*n))),
            },
        },
        Node::Function { id, post_process, children } => Node::Function {
            id,
            post_process,
            children: Slots {
                next: children.next.into_iter().map(collapse_single_children).collect(),
                then: None,
                r#else: None,
            },
        },
        leaf @ Node::Position { .. } => leaf,
    }
}

/// Structural hash over (kind, positions, weighting, conditions, child hashes
/// by slot, order-sensitive). Used to test subtree equivalence when merging
/// gate chains.
fn structural_hash(node: &Node) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hash_into(node, &mut hasher);
    hasher.finalize().into()
}

fn hash_into(node: &Node, hasher: &mut Sha256) {
    match node {
        Node::Position { tickers, weighting, .. } => {
            hasher.update(b"position");
            for t in tickers {
                hasher.update(t.as_bytes());
            }
            hasher.update(format!("{:?}", weighting).as_bytes());
        }
        Node::Basic { weighting, children, .. } => {
            hasher.update(b"basic");
            hasher.update(format!("{:?}", weighting).as_bytes());
            for child in &children.next {
                hash_into(child, hasher);
            }
        }
        Node::Indicator { conditions, children, .. } => {
            hasher.update(b"indicator");
            hasher.update(format!("{:?}", conditions).as_bytes());
            if let Some(then) = &children.then {
                hasher.update(b"then");
                hash_into(then, hasher);
            }
            if let Some(els) = &children.r#else {
                hasher.update(b"else");
                hash_into(els, hasher);
            }
        }
        Node::Function { post_process, children, .. } => {
            hasher.update(b"function");
            hasher.update(format!("{:?}", post_process).as_bytes());
            for child in &children.next {
                hash_into(child, hasher);
            }
        }
    }
}

/// When an `indicator`'s `else` slot holds exactly one nested `indicator` whose
/// `then` is subtree-equivalent to the outer `then`, fold the nested
/// conditions into the outer node as an OR-group and adopt the nested `else`.
/// Recurses to absorb further chained gates, and returns the number of merges
/// performed anywhere in the tree.
fn merge_gate_chains(node: Node) -> (Node, usize) {
    match node {
        Node::Indicator { id, mut conditions, mut children } => {
            let mut merges = 0usize;

            children.then = children.then.map(|n| {
                let (merged, count) = merge_gate_chains(*n);
                merges += count;
                Box::new(merged)
            });
            children.r#else = children.r#else.map(|n| {
                let (merged, count) = merge_gate_chains(*n);
                merges += count;
                Box::new(merged)
            });

            // All conditions folded into a single chain (however many nested
            // gates it absorbs) share one OR-group: `then` fires if the
            // outer condition(s) OR any nested gate's condition(s) hold.
            // `chain_group` is fixed on the first merge so a three-deep
            // chain doesn't splinter into separate AND'd OR-groups.
            let mut chain_group: Option<usize> = None;

            loop {
                let nested_matches = match children.r#else.as_deref() {
                    Some(Node::Indicator { then: nested_then, .. }) => {
                        match (nested_then.as_deref(), children.then.as_deref()) {
                            (Some(a), Some(b)) => structural_hash(a) == structural_hash(b),
                            _ => false,
                        }
                    }
                    _ => false,
                };

                if !nested_matches {
                    break;
                }

                let nested = match children.r#else.take() {
                    Some(boxed) => *boxed,
                    None => unreachable!(),
                };
                if let Node::Indicator { conditions: nested_conditions, children: nested_children, .. } = nested {
                    let group = *chain_group.get_or_insert_with(|| {
                        let g = conditions.iter().filter_map(|c| c.or_group).max().map(|m| m + 1).unwrap_or(0);
                        for c in conditions.iter_mut().filter(|c| c.or_group.is_none()) {
                            c.or_group = Some(g);
                        }
                        g
                    });
                    conditions.extend(nested_conditions.into_iter().map(|mut c| {
                        c.or_group = Some(group);
                        c
                    }));
                    children.r#else = nested_children.r#else;
                    merges += 1;
                } else {
                    unreachable!("nested_matches only true for Indicator");
                }
            }

            (Node::Indicator { id, conditions, children }, merges)
        }
        Node::Basic { id, weighting, children } => {
            let mut merges = 0usize;
            let next = children
                .next
                .into_iter()
                .map(|c| {
                    let (merged, count) = merge_gate_chains(c);
                    merges += count;
                    merged
                })
                .collect();
            (Node::Basic { id, weighting, children: Slots { next, then: None, r#else: None } }, merges)
        }
        Node::Function { id, post_process, children } => {
            let mut merges = 0usize;
            let next = children
                .next
                .into_iter()
                .map(|c| {
                    let (merged, count) = merge_gate_chains(c);
                    merges += count;
                    merged
                })
                .collect();
            (Node::Function { id, post_process, children: Slots { next, then: None, r#else: None } }, merges)
        }
        leaf @ Node::Position { .. } => (leaf, 0),
    }
}

pub(crate) fn compute_ticker_locations(node: &Node, out: &mut HashMap<String, HashSet<Ticker>>) -> HashSet<Ticker> {
    let tickers = match node {
        Node::Position { tickers, .. } => tickers.iter().cloned().collect(),
        Node::Basic { children, .. } => {
            let mut set = HashSet::new();
            for child in &children.next {
                set.extend(compute_ticker_locations(child, out));
            }
            set
        }
        Node::Indicator { conditions, children, .. } => {
            let mut set = HashSet::new();
            for condition in conditions {
                set.insert(condition.ticker.clone());
                if let crate::types::ConditionOperand::Indicator { ticker, .. } = &condition.rhs {
                    set.insert(ticker.clone());
                }
            }
            if let Some(then) = &children.then {
                set.extend(compute_ticker_locations(then, out));
            }
            if let Some(els) = &children.r#else {
                set.extend(compute_ticker_locations(els, out));
            }
            set
        }
        Node::Function { children, .. } => {
            let mut set = HashSet::new();
            for child in &children.next {
                set.extend(compute_ticker_locations(child, out));
            }
            set
        }
    };
    out.insert(node.id().to_string(), tickers.clone());
    tickers
}

/// A `position` is static; a `basic` is static iff every child is static;
/// `indicator` and `function` are never static (they depend on per-day data).
pub(crate) fn compute_static_nodes(node: &Node, out: &mut HashSet<String>) -> bool {
    let is_static = match node {
        Node::Position { .. } => true,
        Node::Basic { children, .. } => children.next.iter().map(|c| compute_static_nodes(c, out)).all(|b| b),
        Node::Indicator { children, .. } => {
            if let Some(then) = &children.then {
                compute_static_nodes(then, out);
            }
            if let Some(els) = &children.r#else {
                compute_static_nodes(els, out);
            }
            false
        }
        Node::Function { children, .. } => {
            for child in &children.next {
                compute_static_nodes(child, out);
            }
            false
        }
    };
    if is_static {
        out.insert(node.id().to_string());
    }
    is_static
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, ConditionOperand, Comparator};

    fn position(id: &str, tickers: &[&str]) -> Node {
        Node::Position {
            id: id.to_string(),
            tickers: tickers.iter().map(|s| s.to_string()).collect(),
            weighting: Weighting::Equal,
        }
    }

    #[test]
    fn prunes_empty_branches_to_a_single_position() {
        let tree = Tree {
            root: Node::Basic {
                id: "root".into(),
                weighting: Weighting::Equal,
                children: Slots {
                    next: vec![position("a", &["Empty"]), position("b", &["AAPL"]), position("c", &["Empty"])],
                    then: None,
                    r#else: None,
                },
            },
        };
        let compressed = compress(&tree).unwrap();
        match &compressed.root {
            Node::Position { tickers, .. } => assert_eq!(tickers, &vec!["AAPL".to_string()]),
            other => panic!("expected a single position, got {:?}", other),
        }
    }

    #[test]
    fn compression_is_idempotent() {
        let tree = Tree {
            root: Node::Basic {
                id: "root".into(),
                weighting: Weighting::Equal,
                children: Slots {
                    next: vec![position("a", &["SPY"]), position("b", &["AAPL"])],
                    then: None,
                    r#else: None,
                },
            },
        };
        let once = compress(&tree).unwrap();
        let wrapped = Tree { root: once.root.clone() };
        let twice = compress(&wrapped).unwrap();
        assert_eq!(structural_hash(&once.root), structural_hash(&twice.root));
    }

    #[test]
    fn payload_hash_is_stable_and_settings_sensitive() {
        let tree = Tree { root: position("root", &["SPY"]) };
        let a = payload_hash(&tree, EvaluationMode::CC, 0.0).unwrap();
        let b = payload_hash(&tree, EvaluationMode::CC, 0.0).unwrap();
        assert_eq!(a, b);

        let different_cost = payload_hash(&tree, EvaluationMode::CC, 10.0).unwrap();
        assert_ne!(a, different_cost);

        let different_mode = payload_hash(&tree, EvaluationMode::OC, 0.0).unwrap();
        assert_ne!(a, different_mode);
    }

    #[test]
    fn merges_gate_chain_with_matching_then_branches() {
        let then_branch = position("tqqq", &["TQQQ"]);
        let inner_gate = Node::Indicator {
            id: "inner".into(),
            conditions: vec![Condition {
                indicator: "RSI".into(),
                ticker: "QQQ".into(),
                params: Default::default(),
                comparator: Comparator::Lt,
                rhs: ConditionOperand::Literal { value: 30.0 },
                or_group: None,
            }],
            children: Slots { next: vec![], then: Some(Box::new(then_branch.clone())), r#else: Some(Box::new(position("bil", &["BIL"]))) },
        };
        let outer_gate = Node::Indicator {
            id: "outer".into(),
            conditions: vec![Condition {
                indicator: "RSI".into(),
                ticker: "SPY".into(),
                params: Default::default(),
                comparator: Comparator::Lt,
                rhs: ConditionOperand::Literal { value: 30.0 },
                or_group: None,
            }],
            children: Slots { next: vec![], then: Some(Box::new(then_branch)), r#else: Some(Box::new(inner_gate)) },
        };
        let compressed = compress(&Tree { root: outer_gate }).unwrap();
        assert_eq!(compressed.stats.gate_chains_merged, 1);
        match &compressed.root {
            Node::Indicator { conditions, children, .. } => {
                assert_eq!(conditions.len(), 2);
                assert!(matches!(children.r#else.as_deref(), Some(Node::Position { tickers, .. }) if tickers == &vec!["BIL".to_string()]));
            }
            other => panic!("expected indicator, got {:?}", other),
        }
    }

    /// Bounded-depth arbitrary tree of `position`/`basic` nodes only (no
    /// gates or functions, whose conditions/post-processing aren't relevant
    /// to the idempotence property below): 0-3 tickers drawn from a small
    /// alphabet, nested under `basic` groups up to `depth` deep.
    fn arb_tree(depth: u32) -> impl proptest::strategy::Strategy<Value = Node> {
        use proptest::prelude::*;

        let leaf = prop::collection::vec(prop_oneof!["AAA", "BBB", "CCC", "Empty"], 0..3)
            .prop_map(|tickers| Node::Position { id: format!("p{}", tickers.join("-")), tickers, weighting: Weighting::Equal });

        if depth == 0 {
            leaf.boxed()
        } else {
            prop_oneof![
                leaf.clone(),
                prop::collection::vec(arb_tree(depth - 1), 1..3).prop_map(|children| Node::Basic {
                    id: format!("b{depth}"),
                    weighting: Weighting::Equal,
                    children: Slots { next: children, then: None, r#else: None },
                }),
            ]
            .boxed()
        }
    }

    proptest::proptest! {
        #[test]
        fn compression_is_idempotent_over_arbitrary_trees(root in arb_tree(3)) {
            let tree = Tree { root };
            // Random trees may compress down to nothing (all-`Empty` tickers);
            // `compress` handles that by degrading to a cash position rather
            // than failing, so every draw is a valid input here.
            let once = compress(&tree).unwrap();
            let wrapped = Tree { root: once.root.clone() };
            let twice = compress(&wrapped).unwrap();
            proptest::prop_assert_eq!(structural_hash(&once.root), structural_hash(&twice.root));
            proptest::prop_assert_eq!(once.stats.compressed_nodes, twice.stats.compressed_nodes);
        }
    }
}
