//! Parametrized derived nodes.
//!
//! A family creates one derived node per distinct parameter, on first
//! access, and hands back the same node for equal parameters afterwards.

use std::fmt;
use std::hash::Hash;

use dashmap::DashMap;
use tracing::trace;

use super::{Derived, StateGraph};

type MakeNode<P, T> = dyn Fn(&StateGraph, String, P) -> Derived<T> + Send + Sync;

pub struct Family<P, T> {
    graph: StateGraph,
    label: String,
    make: Box<MakeNode<P, T>>,
    nodes: DashMap<P, Derived<T>>,
}

impl<P, T> Family<P, T>
where
    P: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new<F>(graph: StateGraph, label: String, make: F) -> Self
    where
        F: Fn(&StateGraph, String, P) -> Derived<T> + Send + Sync + 'static,
    {
        Self {
            graph,
            label,
            make: Box::new(make),
            nodes: DashMap::new(),
        }
    }

    /// The node for `param`, created on first access.
    pub fn get(&self, param: P) -> Derived<T> {
        if let Some(node) = self.nodes.get(&param) {
            return node.clone();
        }

        self.nodes
            .entry(param.clone())
            .or_insert_with(|| {
                let label = format!("{}({:?})", self.label, param);
                trace!(family = %self.label, node = %label, "creating family member");
                (self.make)(&self.graph, label, param)
            })
            .clone()
    }

    pub fn contains(&self, param: &P) -> bool {
        self.nodes.contains_key(param)
    }

    /// Number of members created so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<P, T> fmt::Debug for Family<P, T>
where
    P: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family")
            .field("label", &self.label)
            .field("members", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn equal_params_share_a_node() {
        let graph = StateGraph::new();
        let squares = graph.define_family("square", |n: &u32, _| Ok(n * n));

        let a = squares.get(3);
        let b = squares.get(3);
        let c = squares.get(4);

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(squares.len(), 2);
        assert!(squares.contains(&4));
        assert_eq!(a.label(), "square(3)");
        assert_eq!(GraphNode::<u32>::label(&c), "square(4)");
    }

    #[test]
    fn members_compute_independently() {
        let graph = StateGraph::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let words = graph.define_source("words", Some(vec!["alpine", "andes", "bernina"]));
        let words_clone = words.clone();

        let starting_with = graph.define_family("startingWith", move |prefix: &char, r| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            let words = r.get(&words_clone)?;
            Ok(words
                .into_iter()
                .filter(|w| w.starts_with(*prefix))
                .count())
        });

        let a = starting_with.get('a');
        let b = starting_with.get('b');
        assert_eq!(graph.read(&a).unwrap(), 2);
        assert_eq!(graph.read(&b).unwrap(), 1);
        assert_eq!(graph.read(&a).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
