//! The per-slot selection cutflow.
//!
//! Selections form a tree rooted at an implicit "all rows" parent. A *cut*
//! gates rows on a decision column, a *weight* scales the accumulated row
//! weight, and a *join* conjoins two independently built branches. The
//! per-row outcome of a selection is cached so repeated reads within one
//! row do not re-walk the tree.

use std::cell::Cell;

use tally_core::Result;

use crate::column::{ColumnId, ColumnSet};

/// Handle to a selection inside a [`SelectionSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionId(pub(crate) usize);

impl SelectionId {
    pub fn index(&self) -> usize {
        self.0
    }
}

enum SelectionKind {
    Cut { decision: ColumnId<f64> },
    Weight { decision: ColumnId<f64> },
    Join { left: SelectionId, right: SelectionId },
}

struct Selection {
    name: String,
    channel: bool,
    parent: Option<SelectionId>,
    kind: SelectionKind,
    passed: Cell<Option<bool>>,
    weight: Cell<Option<f64>>,
}

impl Selection {
    fn new(
        name: &str,
        channel: bool,
        parent: Option<SelectionId>,
        kind: SelectionKind,
    ) -> Self {
        Selection {
            name: name.to_string(),
            channel,
            parent,
            kind,
            passed: Cell::new(None),
            weight: Cell::new(None),
        }
    }
}

/// One slot's cutflow tree.
#[derive(Default)]
pub struct SelectionSet {
    nodes: Vec<Selection>,
}

impl SelectionSet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a cut gating on `decision != 0`.
    pub fn add_cut(
        &mut self,
        name: &str,
        channel: bool,
        parent: Option<SelectionId>,
        decision: ColumnId<f64>,
    ) -> SelectionId {
        self.push(Selection::new(
            name,
            channel,
            parent,
            SelectionKind::Cut { decision },
        ))
    }

    /// Add a weight multiplying `decision` into the row weight.
    pub fn add_weight(
        &mut self,
        name: &str,
        parent: Option<SelectionId>,
        decision: ColumnId<f64>,
    ) -> SelectionId {
        self.push(Selection::new(
            name,
            false,
            parent,
            SelectionKind::Weight { decision },
        ))
    }

    /// Add the conjunction of two selections.
    pub fn add_join(&mut self, name: &str, left: SelectionId, right: SelectionId) -> SelectionId {
        self.push(Selection::new(
            name,
            false,
            None,
            SelectionKind::Join { left, right },
        ))
    }

    pub fn name(&self, id: SelectionId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn is_channel(&self, id: SelectionId) -> bool {
        self.nodes[id.0].channel
    }

    /// Path a child of `parent` named `name` would resolve to: the names of
    /// the channel ancestors joined with `/`, then the child's own name.
    pub fn child_path(&self, parent: Option<SelectionId>, name: &str) -> String {
        let mut segments = Vec::new();
        let mut cursor = parent;
        while let Some(id) = cursor {
            let node = &self.nodes[id.0];
            if node.channel {
                segments.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        segments.reverse();
        segments.push(name);
        segments.join("/")
    }

    /// Channel path of an existing selection.
    pub fn path(&self, id: SelectionId) -> String {
        let node = &self.nodes[id.0];
        self.child_path(node.parent, &node.name)
    }

    /// Path through every ancestor regardless of channel flag.
    pub fn full_path(&self, id: SelectionId) -> String {
        let node = &self.nodes[id.0];
        let mut segments = Vec::new();
        let mut cursor = node.parent;
        while let Some(parent) = cursor {
            let ancestor = &self.nodes[parent.0];
            segments.push(ancestor.name.as_str());
            cursor = ancestor.parent;
        }
        segments.reverse();
        segments.push(node.name.as_str());
        segments.join("/")
    }

    /// Whether the selection's cut chain passes for the current row.
    pub fn passed(&self, id: SelectionId, columns: &ColumnSet) -> Result<bool> {
        let node = &self.nodes[id.0];
        if let Some(passed) = node.passed.get() {
            return Ok(passed);
        }
        let passed = match &node.kind {
            SelectionKind::Cut { decision } => {
                self.parent_passed(node.parent, columns)? && columns.value(*decision)? != 0.0
            }
            SelectionKind::Weight { .. } => self.parent_passed(node.parent, columns)?,
            SelectionKind::Join { left, right } => {
                self.passed(*left, columns)? && self.passed(*right, columns)?
            }
        };
        node.passed.set(Some(passed));
        Ok(passed)
    }

    /// Accumulated weight of the selection chain for the current row.
    pub fn weight(&self, id: SelectionId, columns: &ColumnSet) -> Result<f64> {
        let node = &self.nodes[id.0];
        if let Some(weight) = node.weight.get() {
            return Ok(weight);
        }
        let weight = match &node.kind {
            SelectionKind::Cut { .. } => self.parent_weight(node.parent, columns)?,
            SelectionKind::Weight { decision } => {
                self.parent_weight(node.parent, columns)? * columns.value(*decision)?
            }
            SelectionKind::Join { left, right } => {
                self.weight(*left, columns)? * self.weight(*right, columns)?
            }
        };
        node.weight.set(Some(weight));
        Ok(weight)
    }

    pub(crate) fn initialize(&self, index: usize) {
        self.reset(index);
    }

    pub(crate) fn execute(&self, index: usize) {
        self.reset(index);
    }

    pub(crate) fn finalize(&self, index: usize) {
        self.reset(index);
    }

    fn reset(&self, index: usize) {
        let node = &self.nodes[index];
        node.passed.set(None);
        node.weight.set(None);
    }

    fn parent_passed(&self, parent: Option<SelectionId>, columns: &ColumnSet) -> Result<bool> {
        match parent {
            Some(id) => self.passed(id, columns),
            None => Ok(true),
        }
    }

    fn parent_weight(&self, parent: Option<SelectionId>, columns: &ColumnSet) -> Result<f64> {
        match parent {
            Some(id) => self.weight(id, columns),
            None => Ok(1.0),
        }
    }

    fn push(&mut self, selection: Selection) -> SelectionId {
        let index = self.nodes.len();
        self.nodes.push(selection);
        SelectionId(index)
    }
}
