use crate::handle::Handle;
use crate::task::{Call, Graph};
use conduit::key::Key;
use hashbrown::HashMap;

/// Optimization hook applied to a collection's graph before submission.
/// Collections sharing a hook are optimized together so the rewrite pass
/// sees their whole combined subgraph.
pub type OptimizeFn = fn(Graph, &[Key]) -> Graph;

/// The seam between the driver and a user collection library. The driver
/// neither builds nor interprets collection graphs; it merges them, runs the
/// optimization hooks, appends terminal nodes and hands back handles.
pub trait Collection {
    /// Task graph backing this collection.
    fn graph(&self) -> Graph;

    /// The collection's output keys, flattened.
    fn output_keys(&self) -> Vec<Key>;

    /// Graph optimization hook.
    fn optimize(&self) -> OptimizeFn;

    /// Template for the terminal node that reduces the outputs to one
    /// concrete value. The driver appends the output keys as the final
    /// argument.
    fn finalize(&self) -> Call;

    /// Rebuild a semantically identical collection on top of submitted
    /// futures, one per output key.
    fn rebuild(&self, futures: &HashMap<Key, Handle>) -> Box<dyn Collection>;
}

/// Identity hook for libraries without a rewrite pass.
pub fn optimize_identity(graph: Graph, _keys: &[Key]) -> Graph {
    graph
}
