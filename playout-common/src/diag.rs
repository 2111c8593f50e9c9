//! Diagnostics graphs
//!
//! Each long-lived component owns a named graph and reports values ("frame
//! time"), tags (one-shot markers like "dropped-frame") and a status line into
//! it. Graphs register into a process-wide registry at creation so a
//! monitoring surface can enumerate them; the registry holds weak references
//! and is initialized once, read-only thereafter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use tracing::trace;

/// RGB color assigned to a graph series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f32, pub f32, pub f32);

#[derive(Debug, Default)]
struct GraphState {
    text: String,
    colors: HashMap<String, Color>,
    values: HashMap<String, f64>,
    tags: HashMap<String, u64>,
}

/// A diagnostics graph for one component.
#[derive(Debug, Default)]
pub struct Graph {
    state: Mutex<GraphState>,
}

impl Graph {
    pub fn new() -> Arc<Graph> {
        Arc::new(Graph::default())
    }

    /// Set the status line (conventionally the component print-name).
    pub fn set_text(&self, text: impl Into<String>) {
        self.state.lock().unwrap().text = text.into();
    }

    pub fn text(&self) -> String {
        self.state.lock().unwrap().text.clone()
    }

    /// Assign a display color to a series.
    pub fn set_color(&self, name: &str, color: Color) {
        self.state.lock().unwrap().colors.insert(name.to_string(), color);
    }

    /// Report the latest sample of a series.
    pub fn set_value(&self, name: &str, value: f64) {
        self.state.lock().unwrap().values.insert(name.to_string(), value);
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.state.lock().unwrap().values.get(name).copied()
    }

    /// Record a one-shot marker; counts accumulate per tag name.
    pub fn set_tag(&self, name: &str) {
        *self.state.lock().unwrap().tags.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn tag_count(&self, name: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

static REGISTRY: Lazy<Mutex<Vec<Weak<Graph>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Register a graph in the process-wide registry.
pub fn register_graph(graph: &Arc<Graph>) {
    let mut registry = REGISTRY.lock().unwrap();
    registry.retain(|g| g.strong_count() > 0);
    registry.push(Arc::downgrade(graph));
    trace!("diagnostics graph registered ({} live)", registry.len());
}

/// Snapshot the currently live graphs.
pub fn registered_graphs() -> Vec<Arc<Graph>> {
    REGISTRY
        .lock()
        .unwrap()
        .iter()
        .filter_map(Weak::upgrade)
        .collect()
}
