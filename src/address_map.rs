//! Address-map geometry: capability lifetimes drawn over the address space
//!
//! Every vertex becomes a horizontal line from `base` to `bound` at the
//! height of its allocation time. Lines are grouped by [`LineClass`] so the
//! renderer can color each group and build a legend. [`NodePicker`] maps a
//! point on the plot back to the vertex under it.

use crate::capability::CapPerm;
use crate::provenance::{NodeData, NodeId, NodeOrigin, ProvenanceGraph};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default vertical unit, allocation times are shown in millions of cycles
pub const DEFAULT_Y_UNIT: f64 = 1e-6;

/// Group a line is drawn with
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineClass {
    /// Load/store/execute subset of the capability permissions
    Perms(CapPerm),
    /// Mapping returned by a system call
    Call,
}

impl LineClass {
    pub fn of(data: &NodeData) -> Self {
        if data.origin == NodeOrigin::SysMmap {
            LineClass::Call
        } else {
            LineClass::Perms(data.cap.permissions.rwx())
        }
    }

    /// Every class in legend order
    pub fn all() -> Vec<LineClass> {
        let load = CapPerm::LOAD;
        let store = CapPerm::STORE;
        let exec = CapPerm::EXEC;
        vec![
            LineClass::Perms(CapPerm::empty()),
            LineClass::Perms(load),
            LineClass::Perms(store),
            LineClass::Perms(exec),
            LineClass::Perms(load | store),
            LineClass::Perms(load | exec),
            LineClass::Perms(store | exec),
            LineClass::Perms(load | store | exec),
            LineClass::Call,
        ]
    }

    /// Legend label: `R`, `W`, `X` combinations, `None` or `mmap`
    pub fn label(&self) -> String {
        let perms = match self {
            LineClass::Call => return "mmap".to_string(),
            LineClass::Perms(perms) => *perms,
        };
        let mut label = String::new();
        if perms.contains(CapPerm::LOAD) {
            label.push('R');
        }
        if perms.contains(CapPerm::STORE) {
            label.push('W');
        }
        if perms.contains(CapPerm::EXEC) {
            label.push('X');
        }
        if label.is_empty() {
            label.push_str("None");
        }
        label
    }
}

/// One vertex drawn as `[start, end)` at height `y`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddressLine {
    pub node: NodeId,
    pub start: u64,
    pub end: u64,
    pub y: f64,
}

/// Extents of all drawn lines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl BoundingBox {
    fn point_line(line: &AddressLine) -> Self {
        Self {
            xmin: line.start as f64,
            xmax: line.end as f64,
            ymin: line.y,
            ymax: line.y,
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin.min(other.xmin),
            xmax: self.xmax.max(other.xmax),
            ymin: self.ymin.min(other.ymin),
            ymax: self.ymax.max(other.ymax),
        }
    }
}

/// Collects address-map lines grouped by class
#[derive(Debug, Clone)]
pub struct AddressMapBuilder {
    y_unit: f64,
    lines: BTreeMap<LineClass, Vec<AddressLine>>,
    bbox: Option<BoundingBox>,
    skipped: usize,
}

impl Default for AddressMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressMapBuilder {
    pub fn new() -> Self {
        Self::with_y_unit(DEFAULT_Y_UNIT)
    }

    pub fn with_y_unit(y_unit: f64) -> Self {
        Self {
            y_unit,
            lines: BTreeMap::new(),
            bbox: None,
            skipped: 0,
        }
    }

    /// Add the line of one vertex; returns false for overflowed capabilities
    pub fn inspect(&mut self, node: NodeId, data: &NodeData) -> bool {
        let range = match data.cap.checked_range() {
            Ok(range) => range,
            Err(err) => {
                warn!("Skip overflowed node {}: {}", data, err);
                self.skipped += 1;
                return false;
            }
        };
        let line = AddressLine {
            node,
            start: range.start,
            end: range.end,
            y: data.cap.t_alloc as f64 * self.y_unit,
        };
        let line_box = BoundingBox::point_line(&line);
        self.bbox = Some(match self.bbox {
            Some(bbox) => bbox.union(&line_box),
            None => line_box,
        });
        self.lines.entry(LineClass::of(data)).or_default().push(line);
        true
    }

    /// Add every vertex of the graph
    pub fn inspect_graph(&mut self, graph: &ProvenanceGraph) {
        for (node, data) in graph.vertices() {
            self.inspect(node, data);
        }
        debug!(
            "Address map: {} classes, {} skipped",
            self.lines.len(),
            self.skipped
        );
    }

    pub fn lines(&self, class: LineClass) -> &[AddressLine] {
        self.lines.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Classes with at least one line
    pub fn classes(&self) -> impl Iterator<Item = LineClass> + '_ {
        self.lines.keys().copied()
    }

    /// `None` until a line is added
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Label of every class in legend order
    pub fn legend(&self) -> Vec<(LineClass, String)> {
        LineClass::all()
            .into_iter()
            .map(|class| (class, class.label()))
            .collect()
    }
}

/// Finds the vertex drawn nearest to a point
///
/// Vertices are indexed by allocation time. When two vertices share a
/// cycle count the later one wins.
#[derive(Debug, Clone, Default)]
pub struct NodePicker {
    by_time: BTreeMap<i64, NodeId>,
    y_max: i64,
}

impl NodePicker {
    pub fn from_graph(graph: &ProvenanceGraph) -> Self {
        let mut picker = Self::default();
        for (node, data) in graph.vertices() {
            if data.cap.is_overflowed() {
                continue;
            }
            picker.by_time.insert(data.cap.t_alloc, node);
            picker.y_max = picker.y_max.max(data.cap.t_alloc);
        }
        picker
    }

    pub fn len(&self) -> usize {
        self.by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_time.is_empty()
    }

    /// Vertex picked at `(x, y)` among those allocated within `epsilon` of `y`
    ///
    /// The earliest vertex in the window is the initial pick, whether or not
    /// its span contains `x`. A later vertex replaces the pick only when its
    /// span contains `x` and it is closer to `y` than the current pick.
    pub fn pick(&self, graph: &ProvenanceGraph, x: u64, y: i64, epsilon: i64) -> Option<NodeId> {
        let lo = y.saturating_sub(epsilon).max(0);
        let hi = y.saturating_add(epsilon).min(self.y_max);
        if lo > hi {
            return None;
        }

        let mut window = self.by_time.range(lo..=hi);
        let (&first_time, &first) = window.next()?;
        let mut best = (first_time, first);
        for (&time, &node) in window {
            let Some(data) = graph.node(node) else {
                continue;
            };
            let inside = data.cap.base <= x && x <= data.cap.bound();
            if inside && (y - time).abs() < (y - best.0).abs() {
                best = (time, node);
            }
        }
        Some(best.1)
    }
}
