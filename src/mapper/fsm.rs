//! Glob FSM: an ordered tree keyed on `.`-separated metric name segments.
//!
//! The root fans out by `match_metric_type`: `counter` / `gauge` / `observer` / typeless (the
//! empty string, matched when a rule doesn't specify a type, or as a fallback root for
//! unspecified-type lookups). `timer` from the config vocabulary is folded into `observer` at
//! rule-compile time.

use crate::event::MetricType;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RootKind {
    Counter,
    Gauge,
    Observer,
    Typeless,
}

impl RootKind {
    pub fn for_metric_type(t: Option<MetricType>) -> Self {
        match t {
            Some(MetricType::Counter) => RootKind::Counter,
            Some(MetricType::Gauge) => RootKind::Gauge,
            Some(MetricType::Observer) => RootKind::Observer,
            None => RootKind::Typeless,
        }
    }
}

#[derive(Default)]
struct FsmNode {
    literal_children: HashMap<String, usize>,
    wildcard_child: Option<usize>,
    min_remaining: usize,
    max_remaining: usize,
    /// Index into the mapper's global `rules` vector (also its priority), set when this node
    /// is the terminal of a fully-consumed glob pattern.
    rule: Option<usize>,
}

impl FsmNode {
    fn new() -> Self {
        Self {
            min_remaining: usize::MAX,
            max_remaining: 0,
            ..Default::default()
        }
    }

    fn touch(&mut self, remaining: usize) {
        self.min_remaining = self.min_remaining.min(remaining);
        self.max_remaining = self.max_remaining.max(remaining);
    }
}

/// The compiled glob matcher for a single mapping config.
pub struct Fsm {
    nodes: Vec<FsmNode>,
    roots: HashMap<RootKind, usize>,
    /// `glob_disable_ordering`: return the first terminal reached rather than the smallest
    /// priority among all matches.
    pub unordered: bool,
}

impl Fsm {
    pub fn new(unordered: bool) -> Self {
        Self {
            nodes: Vec::new(),
            roots: HashMap::new(),
            unordered,
        }
    }

    fn root(&mut self, kind: RootKind) -> usize {
        *self.roots.entry(kind).or_insert_with(|| {
            self.nodes.push(FsmNode::new());
            self.nodes.len() - 1
        })
    }

    /// Inserts a glob rule `pattern` (already split on `.`) at global index/priority
    /// `rule_idx`, under the root selected by `root_type`.
    pub fn insert(&mut self, pattern: &str, root_type: Option<MetricType>, rule_idx: usize) {
        let segments: Vec<&str> = pattern.split('.').collect();
        let len = segments.len();
        let mut cur = self.root(RootKind::for_metric_type(root_type));
        self.nodes[cur].touch(len);

        for (depth, seg) in segments.iter().enumerate() {
            let remaining = len - depth - 1;

            let next = if *seg == "*" {
                match self.nodes[cur].wildcard_child {
                    Some(n) => n,
                    None => {
                        self.nodes.push(FsmNode::new());
                        let n = self.nodes.len() - 1;
                        self.nodes[cur].wildcard_child = Some(n);
                        n
                    }
                }
            } else {
                match self.nodes[cur].literal_children.get(*seg) {
                    Some(&n) => n,
                    None => {
                        self.nodes.push(FsmNode::new());
                        let n = self.nodes.len() - 1;
                        self.nodes[cur].literal_children.insert((*seg).to_owned(), n);
                        n
                    }
                }
            };

            self.nodes[next].touch(remaining);
            cur = next;
        }

        self.nodes[cur].rule = Some(rule_idx);
    }

    /// Resolves `name` against the given metric type's root, falling back to the typeless root
    /// if nothing was registered for that type. Returns the winning rule's global index plus
    /// the ordered wildcard captures.
    pub fn resolve(&self, name: &str, metric_type: MetricType) -> Option<(usize, Vec<String>)> {
        let segments: Vec<&str> = name.split('.').collect();

        if let Some(&root) = self.roots.get(&RootKind::for_metric_type(Some(metric_type))) {
            if let Some(hit) = self.search_from(root, &segments) {
                return Some(hit);
            }
        }

        let root = *self.roots.get(&RootKind::Typeless)?;
        self.search_from(root, &segments)
    }

    fn search_from(&self, root: usize, segments: &[&str]) -> Option<(usize, Vec<String>)> {
        let mut best: Option<(usize, Vec<String>)> = None;
        let mut captures = Vec::new();
        self.search(root, segments, 0, &mut captures, &mut best);
        best
    }

    /// Returns `true` to signal the caller (unordered mode) to stop searching immediately.
    fn search(
        &self,
        node_idx: usize,
        segments: &[&str],
        depth: usize,
        captures: &mut Vec<String>,
        best: &mut Option<(usize, Vec<String>)>,
    ) -> bool {
        let node = &self.nodes[node_idx];
        let remaining = segments.len() - depth;

        if remaining < node.min_remaining || remaining > node.max_remaining {
            return false;
        }

        if remaining == 0 {
            if let Some(rule_idx) = node.rule {
                if self.unordered {
                    *best = Some((rule_idx, captures.clone()));
                    return true;
                }

                if best.as_ref().map(|(b, _)| rule_idx < *b).unwrap_or(true) {
                    *best = Some((rule_idx, captures.clone()));
                }
            }
            return false;
        }

        let seg = segments[depth];

        if let Some(&child) = node.literal_children.get(seg) {
            if self.search(child, segments, depth + 1, captures, best) {
                return true;
            }
        }

        if let Some(child) = node.wildcard_child {
            captures.push(seg.to_owned());
            let stop = self.search(child, segments, depth + 1, captures, best);
            captures.pop();
            if stop {
                return true;
            }
        }

        false
    }

    /// Renders this FSM as a Graphviz DOT graph, for `--debug.dump-fsm`.
    pub fn dump_dot(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::from("digraph fsm {\n");
        for (&kind, &root) in &self.roots {
            let _ = writeln!(out, "  root_{kind:?} [shape=doublecircle,label={kind:?}];");
            let _ = writeln!(out, "  root_{kind:?} -> n{root};");
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let label = match node.rule {
                Some(rule_idx) => format!("n{idx}\\nrule={rule_idx}"),
                None => format!("n{idx}"),
            };
            let _ = writeln!(out, "  n{idx} [label=\"{label}\"];");
            for (seg, &child) in &node.literal_children {
                let _ = writeln!(out, "  n{idx} -> n{child} [label=\"{seg}\"];");
            }
            if let Some(child) = node.wildcard_child {
                let _ = writeln!(out, "  n{idx} -> n{child} [label=\"*\"];");
            }
        }
        out.push_str("}\n");
        out
    }
}
