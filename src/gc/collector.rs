//! Backup cycle collector
//!
//! Reference counting frees acyclic garbage immediately. Cycles are found by
//! the synchronous algorithm of Bacon & Rajan ("Concurrent Cycle Collection
//! in Reference Counted Systems", 2001):
//!
//! 1. Release of a collectable node that stays alive colors it PURPLE and
//!    buffers it as a possible root.
//! 2. MarkRoots: from every PURPLE root, trial-delete the references held by
//!    the subgraph, coloring it GREY.
//! 3. ScanRoots: a GREY node still referenced from outside is live; it and
//!    everything it reaches turn BLACK again with counts restored. The rest
//!    turns WHITE.
//! 4. CollectRoots: WHITE nodes reachable from the roots are garbage.
//!
//! Nodes are objects and alias cells. Children of an object are reported by
//! its class `traverse` method; an alias has its wrapped value as only child.
//! GREEN nodes never take part.
//!
//! All graph walks use explicit stacks.

use crate::context::Context;
use crate::error::Result;
use crate::gc::arena::{AliasRef, Arena};
use crate::gc::header::{GcColor, Metadata};
use crate::gc::heap::{Chain, ChainIter, ObjectRef};
use crate::variant::Variant;

/// A node of the reference graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Object(ObjectRef),
    Alias(AliasRef),
}

impl Node {
    /// Graph node held by a variant, if any
    #[inline]
    pub fn of(value: Variant) -> Option<Node> {
        match value {
            Variant::Object(obj) => Some(Node::Object(obj)),
            Variant::Alias(alias) => Some(Node::Alias(alias)),
            _ => None,
        }
    }
}

/// Collects the children reported by a class `traverse` method
#[derive(Debug, Default)]
pub struct Tracer {
    nodes: Vec<Node>,
}

impl Tracer {
    /// Report a value held by the object
    #[inline]
    pub fn visit(&mut self, value: Variant) {
        if let Some(node) = Node::of(value) {
            self.nodes.push(node);
        }
    }

    #[inline]
    pub fn visit_object(&mut self, obj: ObjectRef) {
        self.nodes.push(Node::Object(obj));
    }

    #[inline]
    pub fn visit_alias(&mut self, alias: AliasRef) {
        self.nodes.push(Node::Alias(alias));
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}

/// Outcome of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Buffered candidates examined
    pub candidates: usize,
    pub objects_freed: usize,
    pub aliases_freed: usize,
}

/// Totals since the context was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub collections: usize,
    pub objects_freed: usize,
    pub aliases_freed: usize,
}

/// Collector state: arena, chain of collectable objects and candidate buffer
pub struct Collector {
    pub(crate) arena: Arena,
    pub(crate) chain: Chain,
    roots: Vec<Node>,
    collecting: bool,
    stats: CollectorStats,
}

impl Collector {
    pub fn new(page_size: usize) -> Self {
        Collector {
            arena: Arena::new(page_size),
            chain: Chain::default(),
            roots: Vec::new(),
            collecting: false,
            stats: CollectorStats::default(),
        }
    }

    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    #[inline]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Buffered possible roots
    #[inline]
    pub fn candidates(&self) -> &[Node] {
        &self.roots
    }

    #[inline]
    pub fn stats(&self) -> CollectorStats {
        self.stats
    }

    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    pub(crate) fn unbuffer(&mut self, node: Node) {
        if let Some(pos) = self.roots.iter().position(|&n| n == node) {
            self.roots.remove(pos);
        }
    }
}

impl Context {
    /// Run a full cycle collection
    ///
    /// Does nothing if a collection is already in progress.
    pub fn collect_cycles(&mut self) -> Result<CollectStats> {
        if self.collector.collecting {
            return Ok(CollectStats::default());
        }

        self.collector.collecting = true;
        let result = self.run_collection();
        self.collector.collecting = false;

        let stats = result?;
        self.collector.stats.collections += 1;
        self.collector.stats.objects_freed += stats.objects_freed;
        self.collector.stats.aliases_freed += stats.aliases_freed;

        log::debug!(
            "cycle collection: {} candidate(s), {} object(s) and {} alias(es) freed",
            stats.candidates,
            stats.objects_freed,
            stats.aliases_freed
        );
        Ok(stats)
    }

    /// Collect if the candidate buffer reached the configured threshold
    pub(crate) fn maybe_collect(&mut self) -> Result<()> {
        let threshold = self.config.effective_gc_threshold();
        if threshold > 0
            && !self.collector.collecting
            && self.collector.roots.len() >= threshold
        {
            self.collect_cycles()?;
        }
        Ok(())
    }

    /// Number of collectable objects on the chain
    #[inline]
    pub fn chain_len(&self) -> usize {
        self.collector.chain.len()
    }

    /// Walk the chain of collectable objects
    pub fn chain(&self) -> ChainIter<'_> {
        self.collector.chain.iter(&self.heap)
    }

    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Color of a node, `None` if it no longer exists
    pub fn color_of(&self, node: Node) -> Option<GcColor> {
        self.node_meta(node).map(Metadata::color)
    }

    /// Buffer `node` as a possible cycle root
    pub(crate) fn possible_root(&mut self, node: Node) {
        let Some(meta) = self.node_meta_mut(node) else {
            return;
        };
        // WHITE only exists mid-collection, for nodes being freed
        if matches!(
            meta.color(),
            GcColor::Green | GcColor::Purple | GcColor::White
        ) {
            return;
        }
        meta.set_color(GcColor::Purple);
        if !meta.is_buffered() {
            meta.set_buffered(true);
            self.collector.roots.push(node);
        }
    }

    pub(crate) fn node_meta(&self, node: Node) -> Option<&Metadata> {
        match node {
            Node::Object(obj) => self.heap.get(obj).map(|o| &o.meta),
            Node::Alias(alias) => self.collector.arena.live_slot(alias.id()).map(|s| &s.meta),
        }
    }

    pub(crate) fn node_meta_mut(&mut self, node: Node) -> Option<&mut Metadata> {
        match node {
            Node::Object(obj) => self.heap.get_mut(obj).map(|o| &mut o.meta),
            Node::Alias(alias) => self
                .collector
                .arena
                .live_slot_mut(alias.id())
                .map(|s| &mut s.meta),
        }
    }

    /// Collectable nodes directly referenced by `node`
    fn children(&self, node: Node) -> Result<Vec<Node>> {
        let mut tracer = Tracer::default();
        match node {
            Node::Object(obj) => {
                let class = self.object(obj)?.class();
                if let Some(traverse) = self.classes.lookup(class, &|m| m.traverse) {
                    traverse(self, obj, &mut tracer);
                }
            }
            Node::Alias(alias) => tracer.visit(self.alias_get(alias)?),
        }

        let mut nodes = tracer.into_nodes();
        nodes.retain(|&child| {
            self.node_meta(child)
                .is_some_and(|meta| meta.is_collectable())
        });
        Ok(nodes)
    }

    fn set_color(&mut self, node: Node, color: GcColor) {
        if let Some(meta) = self.node_meta_mut(node) {
            meta.set_color(color);
        }
    }

    fn run_collection(&mut self) -> Result<CollectStats> {
        let candidates = std::mem::take(&mut self.collector.roots);
        let mut stats = CollectStats {
            candidates: candidates.len(),
            ..CollectStats::default()
        };

        // MarkRoots
        let mut roots = Vec::with_capacity(candidates.len());
        for node in candidates {
            let Some(meta) = self.node_meta(node) else {
                continue;
            };
            if meta.color() == GcColor::Purple && meta.ref_count > 0 {
                self.mark_grey(node)?;
                roots.push(node);
            } else if let Some(meta) = self.node_meta_mut(node) {
                meta.set_buffered(false);
            }
        }

        // ScanRoots
        for &node in &roots {
            self.scan(node)?;
        }

        // CollectRoots
        let mut garbage = Vec::new();
        for node in roots {
            if let Some(meta) = self.node_meta_mut(node) {
                meta.set_buffered(false);
            }
            self.collect_white(node, &mut garbage)?;
        }

        if !garbage.is_empty() {
            self.free_garbage(&garbage, &mut stats)?;
        }
        Ok(stats)
    }

    fn mark_grey(&mut self, root: Node) -> Result<()> {
        if self.color_of(root) == Some(GcColor::Grey) {
            return Ok(());
        }
        self.set_color(root, GcColor::Grey);

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for child in self.children(node)? {
                let Some(meta) = self.node_meta_mut(child) else {
                    continue;
                };
                debug_assert!(meta.ref_count > 0, "traverse reported an unowned reference");
                meta.ref_count = meta.ref_count.saturating_sub(1);
                if meta.color() != GcColor::Grey {
                    meta.set_color(GcColor::Grey);
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    fn scan(&mut self, root: Node) -> Result<()> {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let Some(meta) = self.node_meta(node) else {
                continue;
            };
            if meta.color() != GcColor::Grey {
                continue;
            }
            if meta.ref_count > 0 {
                self.scan_black(node)?;
            } else {
                self.set_color(node, GcColor::White);
                stack.extend(self.children(node)?);
            }
        }
        Ok(())
    }

    fn scan_black(&mut self, root: Node) -> Result<()> {
        self.set_color(root, GcColor::Black);

        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for child in self.children(node)? {
                let Some(meta) = self.node_meta_mut(child) else {
                    continue;
                };
                meta.ref_count += 1;
                if meta.color() != GcColor::Black {
                    meta.set_color(GcColor::Black);
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    fn collect_white(&mut self, root: Node, garbage: &mut Vec<Node>) -> Result<()> {
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let Some(meta) = self.node_meta_mut(node) else {
                continue;
            };
            if meta.color() != GcColor::White || meta.is_buffered() {
                continue;
            }
            meta.set_color(GcColor::Black);
            garbage.push(node);
            stack.extend(self.children(node)?);
        }
        Ok(())
    }

    /// Free a set of garbage nodes
    ///
    /// Counts along garbage edges are restored first, so that finalizers can
    /// release their references through the normal protocol. A guard
    /// reference keeps every node alive until all of them are finalized.
    fn free_garbage(&mut self, garbage: &[Node], stats: &mut CollectStats) -> Result<()> {
        for &node in garbage {
            for child in self.children(node)? {
                if let Some(meta) = self.node_meta_mut(child) {
                    meta.ref_count += 1;
                }
            }
        }

        for &node in garbage {
            if let Some(meta) = self.node_meta_mut(node) {
                meta.ref_count += 1;
                meta.set_color(GcColor::White);
            }
        }

        for &node in garbage {
            match node {
                Node::Object(obj) => self.finalize_object(obj)?,
                Node::Alias(alias) => {
                    let value = match self.collector.arena.live_slot_mut(alias.id()) {
                        Some(slot) => std::mem::take(&mut slot.value),
                        None => continue,
                    };
                    self.release(value)?;
                }
            }
        }

        for &node in garbage {
            match node {
                Node::Object(obj) => {
                    if !self.heap.contains(obj) {
                        continue;
                    }
                    self.release_object(obj)?;
                    if self.heap.contains(obj) {
                        self.set_color(node, GcColor::Black);
                    } else {
                        stats.objects_freed += 1;
                    }
                }
                Node::Alias(alias) => {
                    if !self.collector.arena.contains(alias.id()) {
                        continue;
                    }
                    self.release_alias(alias)?;
                    if self.collector.arena.contains(alias.id()) {
                        self.set_color(node, GcColor::Black);
                    } else {
                        stats.aliases_freed += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
