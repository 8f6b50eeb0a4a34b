use crate::error::DriverResult;
use conduit::key::Key;
use conduit::message::TaskPayload;
use conduit::support::WireError;
use hashbrown::HashMap;
use indexmap::IndexSet;
use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Argument to a task: a structured shape the driver can walk for remote
/// references without understanding the payload bytes inside. `Bytes` carries
/// an encoded literal, `Remote` a reference to a previously submitted key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Bytes(Vec<u8>),
    Remote(Key),
    List(Vec<Datum>),
    Map(Vec<(String, Datum)>),
}

impl Datum {
    /// Encode a literal value with the default codec.
    pub fn literal<T: serde::Serialize>(value: &T) -> DriverResult<Datum> {
        let bytes = bincode::serialize(value).map_err(WireError::from)?;
        Ok(Datum::Bytes(bytes))
    }

    pub(crate) fn collect_keys(&self, out: &mut IndexSet<Key>) {
        match self {
            Datum::Bytes(_) => (),
            Datum::Remote(key) => {
                out.insert(key.clone());
            }
            Datum::List(items) => {
                for item in items {
                    item.collect_keys(out);
                }
            }
            Datum::Map(entries) => {
                for (_, value) in entries {
                    value.collect_keys(out);
                }
            }
        }
    }
}

/// A single function application. The function bytes come from the caller's
/// serializer and are opaque here; the name is the human-readable head used
/// when minting keys.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub name: String,
    pub function: Vec<u8>,
    pub args: Vec<Datum>,
    pub kwargs: Vec<(String, Datum)>,
}

impl Call {
    #[inline]
    pub fn new<S: Into<String>>(name: S, function: Vec<u8>) -> Call {
        Call {
            name: name.into(),
            function,
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    #[inline]
    pub fn arg(mut self, arg: Datum) -> Call {
        self.args.push(arg);
        self
    }

    /// Append a literal positional argument encoded with the default codec.
    pub fn literal_arg<T: serde::Serialize>(self, value: &T) -> DriverResult<Call> {
        let datum = Datum::literal(value)?;
        Ok(self.arg(datum))
    }

    #[inline]
    pub fn kwarg<S: Into<String>>(mut self, name: S, value: Datum) -> Call {
        self.kwargs.push((name.into(), value));
        self
    }

    /// Keys of every remote reference in the argument lists.
    pub(crate) fn dependencies(&self) -> IndexSet<Key> {
        let mut keys = IndexSet::new();

        for arg in &self.args {
            arg.collect_keys(&mut keys);
        }
        for (_, value) in &self.kwargs {
            value.collect_keys(&mut keys);
        }

        keys
    }
}

/// Graph node: a task to run, or a literal datum placed under a key.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Task(Call),
    Data(Datum),
}

/// DAG of tasks keyed by identifier; edges are the remote references inside
/// each node.
#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    pub nodes: HashMap<Key, Node>,
}

impl Graph {
    #[inline]
    pub fn new() -> Graph {
        Graph {
            nodes: HashMap::new(),
        }
    }

    #[inline]
    pub fn insert_task(&mut self, key: Key, call: Call) {
        self.nodes.insert(key, Node::Task(call));
    }

    #[inline]
    pub fn insert_data(&mut self, key: Key, datum: Datum) {
        self.nodes.insert(key, Node::Data(datum));
    }

    /// Fold another graph into this one. Later entries win on key collisions.
    pub fn merge(&mut self, other: Graph) {
        for (key, node) in other.nodes {
            self.nodes.insert(key, node);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Encoders for task payloads. The driver never introspects the produced
/// bytes; it only ships them.
pub trait TaskCodec: Send + Sync {
    fn encode_args(&self, args: &[Datum]) -> DriverResult<Vec<u8>>;
    fn encode_kwargs(&self, kwargs: &[(String, Datum)]) -> DriverResult<Vec<u8>>;
    fn encode_data(&self, datum: &Datum) -> DriverResult<Vec<u8>>;
}

/// Default codec shipping the `Datum` trees as bincode.
pub struct BincodeCodec;

impl TaskCodec for BincodeCodec {
    fn encode_args(&self, args: &[Datum]) -> DriverResult<Vec<u8>> {
        Ok(bincode::serialize(args).map_err(WireError::from)?)
    }

    fn encode_kwargs(&self, kwargs: &[(String, Datum)]) -> DriverResult<Vec<u8>> {
        Ok(bincode::serialize(kwargs).map_err(WireError::from)?)
    }

    fn encode_data(&self, datum: &Datum) -> DriverResult<Vec<u8>> {
        Ok(bincode::serialize(datum).map_err(WireError::from)?)
    }
}

/// Encode one call into its wire payload. Argument sections are omitted when
/// empty.
pub(crate) fn encode_task(call: &Call, codec: &dyn TaskCodec) -> DriverResult<TaskPayload> {
    let args = if call.args.is_empty() {
        None
    } else {
        Some(codec.encode_args(&call.args)?)
    };

    let kwargs = if call.kwargs.is_empty() {
        None
    } else {
        Some(codec.encode_kwargs(&call.kwargs)?)
    };

    Ok(TaskPayload::Call {
        function: call.function.clone(),
        args,
        kwargs,
    })
}

pub(crate) fn encode_node(node: &Node, codec: &dyn TaskCodec) -> DriverResult<TaskPayload> {
    match node {
        Node::Task(call) => encode_task(call, codec),
        Node::Data(datum) => Ok(TaskPayload::Data(codec.encode_data(datum)?)),
    }
}

pub(crate) fn node_dependencies(node: &Node) -> IndexSet<Key> {
    match node {
        Node::Task(call) => call.dependencies(),
        Node::Data(datum) => {
            let mut keys = IndexSet::new();
            datum.collect_keys(&mut keys);
            keys
        }
    }
}

/// Content fingerprint of a call: function identity, then keyword, then
/// positional arguments.
pub(crate) fn fingerprint(call: &Call, codec: &dyn TaskCodec) -> DriverResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(&call.function);
    hasher.update(codec.encode_kwargs(&call.kwargs)?);
    hasher.update(codec.encode_args(&call.args)?);

    let digest = hex::encode(hasher.finalize());
    Ok(digest[..32].to_string())
}

/// Key for a pure submission: equal calls coalesce onto one key.
pub(crate) fn pure_key(call: &Call, codec: &dyn TaskCodec) -> DriverResult<Key> {
    Ok(Key::token(format!(
        "{}-{}",
        call.name,
        fingerprint(call, codec)?
    )))
}

/// Key for an impure submission: fresh on every call.
pub(crate) fn impure_key(name: &str) -> Key {
    Key::token(format!("{}-{}", name, Uuid::new_v4()))
}

/// Nested container of values preserving list/tuple/set/map identity and
/// order across a gather. `Null` marks entries dropped by the skip-errors
/// policy.
#[derive(Clone, Debug, PartialEq)]
pub enum Tree<T> {
    Leaf(T),
    List(Vec<Tree<T>>),
    Tuple(Vec<Tree<T>>),
    Set(Vec<Tree<T>>),
    Map(Vec<(String, Tree<T>)>),
    Null,
}

pub type KeyTree = Tree<Key>;

impl<T> Tree<T> {
    /// Every leaf value in depth-first order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'t>(&'t self, out: &mut Vec<&'t T>) {
        match self {
            Tree::Leaf(value) => out.push(value),
            Tree::List(items) | Tree::Tuple(items) | Tree::Set(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
            Tree::Map(entries) => {
                for (_, value) in entries {
                    value.collect_leaves(out);
                }
            }
            Tree::Null => (),
        }
    }

    /// Rebuild the tree with every leaf replaced, keeping the container
    /// shapes intact.
    pub fn map<U, F>(&self, replace: &mut F) -> Tree<U>
    where
        F: FnMut(&T) -> Tree<U>,
    {
        match self {
            Tree::Leaf(value) => replace(value),
            Tree::List(items) => Tree::List(items.iter().map(|item| item.map(replace)).collect()),
            Tree::Tuple(items) => Tree::Tuple(items.iter().map(|item| item.map(replace)).collect()),
            Tree::Set(items) => Tree::Set(items.iter().map(|item| item.map(replace)).collect()),
            Tree::Map(entries) => Tree::Map(
                entries
                    .iter()
                    .map(|(name, value)| (name.clone(), value.map(replace)))
                    .collect(),
            ),
            Tree::Null => Tree::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_call() -> Call {
        Call::new("add", b"fn:add".to_vec())
            .literal_arg(&1i64)
            .unwrap()
            .literal_arg(&2i64)
            .unwrap()
    }

    #[test]
    fn test_dependencies_walk_nested_shapes() {
        let call = Call::new("combine", b"fn:combine".to_vec())
            .arg(Datum::List(vec![
                Datum::Remote(Key::token("a")),
                Datum::Bytes(vec![1]),
            ]))
            .kwarg(
                "extra",
                Datum::Map(vec![("inner".to_string(), Datum::Remote(Key::token("b")))]),
            );

        let deps = call.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&Key::token("a")));
        assert!(deps.contains(&Key::token("b")));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let first = fingerprint(&add_call(), &BincodeCodec).unwrap();
        let second = fingerprint(&add_call(), &BincodeCodec).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn test_fingerprint_tracks_arguments() {
        let other = Call::new("add", b"fn:add".to_vec())
            .literal_arg(&1i64)
            .unwrap()
            .literal_arg(&3i64)
            .unwrap();

        assert_ne!(
            fingerprint(&add_call(), &BincodeCodec).unwrap(),
            fingerprint(&other, &BincodeCodec).unwrap()
        );
    }

    #[test]
    fn test_pure_key_prefix() {
        let key = pure_key(&add_call(), &BincodeCodec).unwrap();
        assert!(key.name().starts_with("add-"));
    }

    #[test]
    fn test_impure_keys_differ() {
        assert_ne!(impure_key("rand"), impure_key("rand"));
    }

    #[test]
    fn test_encode_task_omits_empty_sections() {
        let bare = Call::new("noop", b"fn:noop".to_vec());

        match encode_task(&bare, &BincodeCodec).unwrap() {
            TaskPayload::Call { args, kwargs, .. } => {
                assert!(args.is_none());
                assert!(kwargs.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_tree_map_preserves_shape() {
        let tree: Tree<i64> = Tree::Tuple(vec![
            Tree::Leaf(1),
            Tree::List(vec![Tree::Leaf(2)]),
            Tree::Map(vec![("x".to_string(), Tree::Leaf(3))]),
        ]);

        let doubled = tree.map(&mut |value| Tree::Leaf(value * 2));

        assert_eq!(
            doubled,
            Tree::Tuple(vec![
                Tree::Leaf(2),
                Tree::List(vec![Tree::Leaf(4)]),
                Tree::Map(vec![("x".to_string(), Tree::Leaf(6))]),
            ])
        );
        assert_eq!(tree.leaves(), vec![&1, &2, &3]);
    }
}
