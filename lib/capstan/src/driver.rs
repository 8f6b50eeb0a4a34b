use crate::collection::Collection;
use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::handle::{Handle, HandleTree};
use crate::reactor::{Command, LoopMsg, Reactor};
use crate::registry::Registry;
use crate::registry::Status;
use crate::stream::{flow_channel, Flow, Stream};
use crate::task::{
    encode_node, encode_task, fingerprint, impure_key, node_dependencies, pure_key, BincodeCodec,
    Call, Datum, Graph, KeyTree, Node, TaskCodec, Tree,
};
use crate::transport::{connect, spawn_reader, EventSource, EventWriter, LocalScheduler, Rpc};
use crate::wake::Wake;
use conduit::frame::write_frame;
use conduit::key::Key;
use conduit::logging;
use conduit::message::{
    ClientId, DriverMessage, GatherReply, PeerKind, RpcRequest, RpcResponse, ScatterPayload,
    WorkerReply, WorkerRequest,
};
use conduit::support::WorkerAddr;
use hashbrown::HashMap;
use indexmap::IndexSet;
use lazy_static::lazy_static;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

lazy_static! {
    /// Process-wide default driver slot: set on connect, cleared on shutdown.
    static ref DEFAULT_DRIVER: Mutex<Weak<Core>> = Mutex::new(Weak::new());
}

/// Values gathered back from the cluster, in the shape the handles came in.
pub type ValueTree = Tree<Vec<u8>>;

/// What to do with handles that settled in error during a gather.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// Surface the first stored fault.
    Raise,
    /// Drop the failed keys and record nulls in their place.
    Skip,
}

/// Condition `wait` blocks on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReturnWhen {
    AllCompleted,
}

/// Worker restrictions attached to a submission.
#[derive(Clone, Debug)]
pub enum Workers {
    /// One restriction set applied to every submitted key.
    Set(Vec<WorkerAddr>),
    /// Positional restriction sets, one per task. Only meaningful for `map`,
    /// where the length must match the number of tasks.
    PerTask(Vec<Vec<WorkerAddr>>),
}

impl From<WorkerAddr> for Workers {
    /// A single worker is normalized to a one-element restriction list.
    #[inline]
    fn from(addr: WorkerAddr) -> Workers {
        Workers::Set(vec![addr])
    }
}

#[derive(Clone, Debug)]
pub struct SubmitOptions {
    /// Explicit key; minted from the call when absent.
    pub key: Option<Key>,
    /// Pure calls coalesce onto content-derived keys.
    pub pure: bool,
    pub workers: Option<Workers>,
    /// Permit the scheduler to spill restricted tasks onto other workers.
    pub allow_other_workers: bool,
}

impl Default for SubmitOptions {
    fn default() -> SubmitOptions {
        SubmitOptions {
            key: None,
            pure: true,
            workers: None,
            allow_other_workers: false,
        }
    }
}

/// Where the driver connects: a network address or an in-process scheduler.
pub enum ConnectTarget {
    Addr(WorkerAddr),
    Local(Arc<dyn LocalScheduler>),
}

impl From<WorkerAddr> for ConnectTarget {
    #[inline]
    fn from(addr: WorkerAddr) -> ConnectTarget {
        ConnectTarget::Addr(addr)
    }
}

impl From<Arc<dyn LocalScheduler>> for ConnectTarget {
    #[inline]
    fn from(scheduler: Arc<dyn LocalScheduler>) -> ConnectTarget {
        ConnectTarget::Local(scheduler)
    }
}

impl FromStr for ConnectTarget {
    type Err = DriverError;

    fn from_str(text: &str) -> DriverResult<ConnectTarget> {
        Ok(ConnectTarget::Addr(text.parse().map_err(DriverError::Wire)?))
    }
}

/// Capability to bridge a bare center: spawns the local scheduler that will
/// serve this driver against it.
pub type CenterSpawner = Box<dyn FnOnce(WorkerAddr) -> DriverResult<Arc<dyn LocalScheduler>> + Send>;

pub struct ConnectOptions {
    pub config: DriverConfig,
    /// Logger for the driver and its threads; built from the config's
    /// logging section (or discarded) when absent.
    pub logger: Option<logging::Logger>,
    pub center_spawner: Option<CenterSpawner>,
}

impl Default for ConnectOptions {
    fn default() -> ConnectOptions {
        ConnectOptions {
            config: DriverConfig::default(),
            logger: None,
            center_spawner: None,
        }
    }
}

/// Shared state behind every handle and public call. The registry holds all
/// handle state; the mailbox serializes everything onto the event loop.
pub(crate) struct Core {
    pub(crate) id: ClientId,
    pub(crate) registry: Arc<Registry>,
    post: Mutex<Sender<LoopMsg>>,
    rpc: Rpc,
    rpc_center: Rpc,
    pub(crate) codec: Box<dyn TaskCodec>,
    config: DriverConfig,
    scheduler_addr: Option<WorkerAddr>,

    // Handshake and lifecycle signals
    started: Arc<Wake>,
    restarted: Arc<Wake>,
    stopped: Arc<Wake>,
    loop_thread: Mutex<Option<thread::JoinHandle<()>>>,

    // Log
    pub(crate) log: logging::Logger,
}

impl Core {
    fn post(&self, msg: LoopMsg) -> DriverResult<()> {
        self.post
            .lock()
            .unwrap()
            .send(msg)
            .map_err(|_| DriverError::Shutdown)
    }

    pub(crate) fn send_to_scheduler(&self, msg: DriverMessage) -> DriverResult<()> {
        self.post(LoopMsg::Command(Command::Send(msg)))
    }

    /// Release a key whose last local reference is gone.
    pub(crate) fn release_key(&self, key: &Key) {
        logging::debug!(self.log, "release key"; "context" => "release", "key" => %key);
        self.registry.release(key);

        let _ = self.send_to_scheduler(DriverMessage::ClientReleasesKeys {
            keys: vec![key.clone()],
            client: self.id.clone(),
        });
    }

    /// Wait for a set of keys and pull their payloads. Returns the payload
    /// map and the keys dropped by the skip policy.
    pub(crate) fn gather_flat(
        &self,
        keys: &[Key],
        errors: ErrorPolicy,
    ) -> DriverResult<(HashMap<Key, Vec<u8>>, IndexSet<Key>)> {
        let mut keys: IndexSet<Key> = keys.iter().cloned().collect();
        let mut bad = IndexSet::new();

        loop {
            // Block on every key the registry still tracks.
            for key in &keys {
                if let Some(wake) = self.registry.wake_of(key) {
                    wake.wait();
                }
            }

            // Collect terminal failures before touching the scheduler.
            let mut faults = Vec::new();
            for key in &keys {
                match self.registry.status(key) {
                    Status::Error => faults.push((
                        key.clone(),
                        DriverError::Task {
                            exception: self.registry.exception_of(key).unwrap_or_default(),
                            traceback: self.registry.traceback_of(key),
                        },
                    )),
                    Status::Cancelled => {
                        faults.push((key.clone(), DriverError::Cancelled(key.clone())))
                    }
                    _ => (),
                }
            }

            if !faults.is_empty() {
                match errors {
                    ErrorPolicy::Raise => return Err(faults.remove(0).1),
                    ErrorPolicy::Skip => {
                        for (key, _) in faults {
                            keys.swap_remove(&key);
                            bad.insert(key);
                        }
                    }
                }
            }

            if keys.is_empty() {
                return Ok((HashMap::new(), bad));
            }

            let request = RpcRequest::Gather {
                keys: keys.iter().cloned().collect(),
            };

            match self.rpc.call(&request)? {
                RpcResponse::Gather(GatherReply::Data(data)) => return Ok((data, bad)),
                RpcResponse::Gather(GatherReply::Missing(missing)) => {
                    logging::debug!(self.log, "scheduler could not gather";
                                    "context" => "gather", "missing" => missing.len());

                    // Re-arm the wakes before reporting: any key-in-memory
                    // triggered by the report arrives after the send and can
                    // never be erased by the clear.
                    for key in &missing {
                        if let Some(wake) = self.registry.wake_of(key) {
                            wake.clear();
                        }
                    }

                    self.send_to_scheduler(DriverMessage::MissingData {
                        missing,
                    })?;
                }
                RpcResponse::Error { message } => return Err(DriverError::Rpc(message)),
                other => {
                    return Err(DriverError::Rpc(format!(
                        "unexpected gather response: {:?}",
                        other
                    )))
                }
            }
        }
    }

    /// Cancel keys with the scheduler and erase them locally. The local erase
    /// happens immediately either way; the acknowledgment is awaited only
    /// when `block` is set.
    pub(crate) fn cancel_keys(&self, keys: Vec<Key>, block: bool) -> DriverResult<()> {
        let request = RpcRequest::Cancel {
            keys: keys.clone(),
            client: self.id.clone(),
        };

        if block {
            self.rpc.call(&request)?;
        } else {
            let rpc = self.rpc.clone();
            thread::spawn(move || drop(rpc.call(&request)));
        }

        for key in &keys {
            self.registry.cancel_key(key);
        }

        Ok(())
    }
}

/// Drives computations on a distributed cluster. The driver encodes
/// submissions into graph updates, tracks every outstanding key through the
/// scheduler's event stream, and materializes results back into the local
/// process on demand.
#[derive(Clone)]
pub struct Driver {
    core: Arc<Core>,
}

impl Driver {
    /// Connect with default options.
    pub fn connect<T: Into<ConnectTarget>>(target: T) -> DriverResult<Driver> {
        Driver::connect_with(target.into(), ConnectOptions::default())
    }

    pub fn connect_with(target: ConnectTarget, options: ConnectOptions) -> DriverResult<Driver> {
        let ConnectOptions {
            config,
            logger,
            center_spawner,
        } = options;

        let log = match logger {
            Some(log) => log,
            None => config.build_logger()?,
        };

        let id: ClientId = Uuid::new_v4().to_string();
        let timeout = config.connect_timeout();

        let (writer, source, rpc, rpc_center, scheduler_addr) = match target {
            ConnectTarget::Local(scheduler) => {
                let (tx, rx) = scheduler.attach(&id);
                let rpc = Rpc::Local(scheduler);

                (
                    EventWriter::Local(tx),
                    EventSource::Local(rx),
                    rpc.clone(),
                    rpc,
                    None,
                )
            }
            ConnectTarget::Addr(addr) => {
                let rpc = Rpc::Remote {
                    addr: addr.clone(),
                    timeout,
                };

                let ident = match rpc.call(&RpcRequest::Identity) {
                    Ok(RpcResponse::Identity(ident)) => ident,
                    Ok(_) => {
                        return Err(DriverError::Connect(format!(
                            "malformed identity response from {}",
                            addr
                        )))
                    }
                    Err(_) => {
                        return Err(DriverError::Connect(format!(
                            "could not connect to {}",
                            addr
                        )))
                    }
                };

                match ident.kind {
                    PeerKind::Scheduler => {
                        let mut stream = connect(&addr, timeout)?;
                        write_frame(
                            &mut stream,
                            &DriverMessage::RegisterClient { client: id.clone() },
                        )
                        .map_err(DriverError::Wire)?;

                        let reader_half = stream.try_clone().map_err(DriverError::from)?;

                        // Broadcasts go through the center when the scheduler
                        // fronts one, and straight to the scheduler otherwise.
                        let rpc_center = match ident.center {
                            Some(center) => Rpc::Remote {
                                addr: center,
                                timeout,
                            },
                            None => rpc.clone(),
                        };

                        (
                            EventWriter::Remote(stream),
                            EventSource::Remote(reader_half),
                            rpc,
                            rpc_center,
                            Some(addr),
                        )
                    }
                    PeerKind::Center => {
                        // A bare center cannot schedule; bridge it with a
                        // locally spawned scheduler if the caller provided
                        // the capability.
                        let spawner = center_spawner.ok_or_else(|| {
                            DriverError::Connect(format!(
                                "no local scheduler available to bridge center {}",
                                addr
                            ))
                        })?;

                        let scheduler = spawner(addr.clone())?;
                        let (tx, rx) = scheduler.attach(&id);

                        (
                            EventWriter::Local(tx),
                            EventSource::Local(rx),
                            Rpc::Local(scheduler),
                            Rpc::Remote {
                                addr: addr.clone(),
                                timeout,
                            },
                            Some(addr),
                        )
                    }
                    PeerKind::Other(kind) => return Err(DriverError::UnknownPeerType(kind)),
                }
            }
        };

        let (post, mailbox) = channel();
        let registry = Arc::new(Registry::new());
        let started = Arc::new(Wake::new());
        let restarted = Arc::new(Wake::new());
        let stopped = Arc::new(Wake::new());

        let reactor = Reactor::new(
            mailbox,
            writer,
            registry.clone(),
            started.clone(),
            restarted.clone(),
            stopped.clone(),
            log.new(logging::o!()),
        );
        let loop_thread = thread::spawn(move || reactor.run());
        // The reader is deliberately detached; it dies with the stream.
        drop(spawn_reader(source, post.clone(), log.new(logging::o!())));

        let core = Arc::new(Core {
            id,
            registry,
            post: Mutex::new(post),
            rpc,
            rpc_center,
            codec: Box::new(BincodeCodec),
            config,
            scheduler_addr,
            started,
            restarted,
            stopped,
            loop_thread: Mutex::new(Some(loop_thread)),
            log,
        });

        if !core.started.wait_timeout(timeout) {
            drop(core.post(LoopMsg::Command(Command::Stop)));
            return Err(DriverError::Connect(
                "scheduler did not start the event stream".to_string(),
            ));
        }

        *DEFAULT_DRIVER.lock().unwrap() = Arc::downgrade(&core);
        logging::debug!(core.log, "driver connected";
                        "context" => "connect", "client" => core.id.as_str());

        Ok(Driver { core })
    }

    /// Unique client id attached to every outbound message.
    #[inline]
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Submit one function application to the scheduler. An equivalent pure
    /// submission reuses the existing key and sends nothing.
    pub fn submit(&self, call: Call, options: &SubmitOptions) -> DriverResult<Handle> {
        if call.function.is_empty() {
            return Err(DriverError::Argument(
                "submit requires an encoded function".to_string(),
            ));
        }
        if options.allow_other_workers && options.workers.is_none() {
            return Err(DriverError::Argument(
                "allow_other_workers requires workers".to_string(),
            ));
        }

        let key = match &options.key {
            Some(key) => key.clone(),
            None if options.pure => pure_key(&call, self.core.codec.as_ref())?,
            None => impure_key(&call.name),
        };

        if self.core.registry.contains(&key) {
            return Ok(Handle::new(key, &self.core));
        }

        let workers = match &options.workers {
            None => None,
            Some(Workers::Set(list)) => Some(list.clone()),
            Some(Workers::PerTask(_)) => {
                return Err(DriverError::Argument(
                    "per-task worker restrictions only apply to map".to_string(),
                ))
            }
        };

        let mut restrictions = HashMap::new();
        let mut loose_restrictions = IndexSet::new();
        if let Some(list) = workers {
            restrictions.insert(key.clone(), list);
            if options.allow_other_workers {
                loose_restrictions.insert(key.clone());
            }
        }

        let dependencies = call.dependencies();
        let task = encode_task(&call, self.core.codec.as_ref())?;

        logging::debug!(self.core.log, "submit";
                        "context" => "submit", "function" => call.name.as_str(), "key" => %key);

        // The handle must be registered before the message can reach the
        // transport.
        let handle = Handle::new(key.clone(), &self.core);

        let mut tasks = HashMap::new();
        tasks.insert(key.clone(), task);
        let mut deps = HashMap::new();
        deps.insert(key.clone(), dependencies);

        self.core.send_to_scheduler(DriverMessage::UpdateGraph {
            tasks,
            dependencies: deps,
            keys: vec![key],
            restrictions,
            loose_restrictions,
            client: self.core.id.clone(),
        })?;

        Ok(handle)
    }

    /// Map a call template over columns of arguments, one task per row,
    /// batched into a single graph update. Columns of uneven length are
    /// zipped to the shortest.
    pub fn map(
        &self,
        call: Call,
        columns: &[Vec<Datum>],
        options: &SubmitOptions,
    ) -> DriverResult<Vec<Handle>> {
        if call.function.is_empty() {
            return Err(DriverError::Argument(
                "map requires an encoded function".to_string(),
            ));
        }
        if !call.args.is_empty() {
            return Err(DriverError::Argument(
                "map template carries positional arguments; they come from the columns".to_string(),
            ));
        }
        if options.allow_other_workers && options.workers.is_none() {
            return Err(DriverError::Argument(
                "allow_other_workers requires workers".to_string(),
            ));
        }

        let count = columns.iter().map(Vec::len).min().unwrap_or(0);
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut calls = Vec::with_capacity(count);
        for row in 0..count {
            let mut task_call = call.clone();
            task_call.args = columns.iter().map(|column| column[row].clone()).collect();
            calls.push(task_call);
        }

        let keys = if options.pure {
            calls
                .iter()
                .map(|task_call| pure_key(task_call, self.core.codec.as_ref()))
                .collect::<DriverResult<Vec<_>>>()?
        } else {
            // Impure rows share a per-call uid plus a per-row uuid.
            let uid = Uuid::new_v4();
            calls
                .iter()
                .map(|task_call| Key::token(format!("{}-{}-{}", task_call.name, uid, Uuid::new_v4())))
                .collect()
        };

        let mut restrictions = HashMap::new();
        match &options.workers {
            None => (),
            Some(Workers::Set(list)) => {
                for key in &keys {
                    restrictions.insert(key.clone(), list.clone());
                }
            }
            Some(Workers::PerTask(lists)) => {
                if lists.len() != keys.len() {
                    return Err(DriverError::Argument(format!(
                        "{} worker restrictions for a sequence of length {}",
                        lists.len(),
                        keys.len()
                    )));
                }
                for (key, list) in keys.iter().zip(lists) {
                    restrictions.insert(key.clone(), list.clone());
                }
            }
        }

        let mut loose_restrictions = IndexSet::new();
        if options.allow_other_workers {
            loose_restrictions.extend(keys.iter().cloned());
        }

        let mut tasks = HashMap::new();
        let mut dependencies = HashMap::new();
        for (key, task_call) in keys.iter().zip(&calls) {
            tasks.insert(key.clone(), encode_task(task_call, self.core.codec.as_ref())?);
            dependencies.insert(key.clone(), task_call.dependencies());
        }

        logging::debug!(self.core.log, "map";
                        "context" => "map", "function" => call.name.as_str(), "tasks" => keys.len());

        let handles: Vec<Handle> = keys
            .iter()
            .map(|key| Handle::new(key.clone(), &self.core))
            .collect();

        self.core.send_to_scheduler(DriverMessage::UpdateGraph {
            tasks,
            dependencies,
            keys,
            restrictions,
            loose_restrictions,
            client: self.core.id.clone(),
        })?;

        Ok(handles)
    }

    /// Map over streaming inputs: a helper thread pulls one element per input
    /// stream, submits a task per row and feeds the resulting handles to the
    /// returned flow. The flow closes when any input closes.
    pub fn map_stream(
        &self,
        call: Call,
        inputs: Vec<Box<dyn Stream<Datum>>>,
        options: &SubmitOptions,
    ) -> DriverResult<Flow<Handle>> {
        if inputs.is_empty() {
            return Err(DriverError::Argument(
                "map_stream requires at least one input stream".to_string(),
            ));
        }
        if options.key.is_some() {
            return Err(DriverError::Argument(
                "explicit keys cannot apply to a streaming map".to_string(),
            ));
        }

        let (tx, flow) = flow_channel(self.core.config.stream_queue_bound);
        let driver = self.clone();
        let options = options.clone();

        thread::spawn(move || {
            let mut inputs = inputs;

            'rows: loop {
                let mut row = Vec::with_capacity(inputs.len());
                for input in inputs.iter_mut() {
                    match input.pull() {
                        Some(datum) => row.push(datum),
                        None => break 'rows,
                    }
                }

                let mut task_call = call.clone();
                task_call.args = row;

                match driver.submit(task_call, &options) {
                    Ok(handle) => {
                        if !tx.send(handle) {
                            break;
                        }
                    }
                    Err(error) => {
                        logging::warn!(driver.core.log, "streaming submit failed";
                                       "context" => "map_stream", "error" => %error);
                        break;
                    }
                }
            }
        });

        Ok(flow)
    }

    /// Translate an arbitrary task graph into one update, wait on the
    /// requested output keys and return their values in the same shape.
    pub fn get(
        &self,
        graph: Graph,
        keys: &KeyTree,
        restrictions: Option<HashMap<Key, Vec<WorkerAddr>>>,
    ) -> DriverResult<ValueTree> {
        let flat: Vec<Key> = keys.leaves().into_iter().cloned().collect();

        // Handles for every requested output, registered up front.
        let handles: Vec<Handle> = flat
            .iter()
            .map(|key| Handle::new(key.clone(), &self.core))
            .collect();

        let mut tasks = HashMap::new();
        let mut dependencies = HashMap::new();
        for (key, node) in graph.nodes.iter() {
            // A node that merely aliases its own key carries no work.
            if let Node::Data(Datum::Remote(target)) = node {
                if target == key {
                    continue;
                }
            }
            tasks.insert(key.clone(), encode_node(node, self.core.codec.as_ref())?);
            dependencies.insert(key.clone(), node_dependencies(node));
        }

        self.core.send_to_scheduler(DriverMessage::UpdateGraph {
            tasks,
            dependencies,
            keys: flat,
            restrictions: restrictions.unwrap_or_default(),
            loose_restrictions: IndexSet::new(),
            client: self.core.id.clone(),
        })?;

        let tree = keys.map(&mut |key| Tree::Leaf(Handle::new(key.clone(), &self.core)));
        let result = self.gather(&tree, ErrorPolicy::Raise);
        drop(handles);
        result
    }

    /// Gather results for a nested structure of handles. The returned tree
    /// mirrors the input shape exactly.
    pub fn gather(&self, tree: &HandleTree, errors: ErrorPolicy) -> DriverResult<ValueTree> {
        let mut keys = IndexSet::new();
        for handle in tree.leaves() {
            keys.insert(handle.key().clone());
        }
        let keys: Vec<Key> = keys.into_iter().collect();

        let (data, _bad) = self.core.gather_flat(&keys, errors)?;

        Ok(tree.map(&mut |handle| match data.get(handle.key()) {
            Some(bytes) => Tree::Leaf(bytes.clone()),
            None => Tree::Null,
        }))
    }

    /// Gather a stream of handles one element at a time on a helper thread.
    pub fn gather_stream(&self, mut handles: Box<dyn Stream<Handle>>) -> Flow<DriverResult<Vec<u8>>> {
        let (tx, flow) = flow_channel(self.core.config.stream_queue_bound);

        thread::spawn(move || {
            while let Some(handle) = handles.pull() {
                if !tx.send(handle.result()) {
                    break;
                }
            }
        });

        flow
    }

    /// Push local data into cluster memory and receive finished handles.
    pub fn scatter(
        &self,
        data: ScatterPayload,
        workers: Option<Vec<WorkerAddr>>,
        broadcast: bool,
    ) -> DriverResult<Scattered> {
        let named = match &data {
            ScatterPayload::Seq(_) => false,
            ScatterPayload::Named(_) => true,
        };

        let response = self.core.rpc.call(&RpcRequest::Scatter {
            data,
            workers,
            client: self.core.id.clone(),
            broadcast,
        })?;

        let keys = match response {
            RpcResponse::Scatter { keys } => keys,
            RpcResponse::Error { message } => return Err(DriverError::Rpc(message)),
            other => {
                return Err(DriverError::Rpc(format!(
                    "unexpected scatter response: {:?}",
                    other
                )))
            }
        };

        // The payloads are already in cluster memory; register the handles
        // born finished.
        let handles: Vec<Handle> = keys
            .iter()
            .map(|key| Handle::new(key.clone(), &self.core))
            .collect();
        for key in &keys {
            self.core.registry.mark_finished(key, None);
        }

        if named {
            let mut by_name = HashMap::new();
            for handle in handles {
                by_name.insert(handle.key().name().to_string(), handle);
            }
            Ok(Scattered::Named(by_name))
        } else {
            Ok(Scattered::Seq(handles))
        }
    }

    /// Scatter a stream of payloads one element at a time on a helper thread.
    pub fn scatter_stream(
        &self,
        mut items: Box<dyn Stream<Vec<u8>>>,
        workers: Option<Vec<WorkerAddr>>,
        broadcast: bool,
    ) -> Flow<DriverResult<Handle>> {
        let (tx, flow) = flow_channel(self.core.config.stream_queue_bound);
        let driver = self.clone();

        thread::spawn(move || {
            while let Some(item) = items.pull() {
                let result = driver
                    .scatter(ScatterPayload::Seq(vec![item]), workers.clone(), broadcast)
                    .and_then(|scattered| match scattered {
                        Scattered::Seq(mut handles) if !handles.is_empty() => {
                            Ok(handles.remove(0))
                        }
                        _ => Err(DriverError::Rpc("scatter returned no keys".to_string())),
                    });

                if !tx.send(result) {
                    break;
                }
            }
        });

        flow
    }

    /// Compute collections on the cluster, one terminal node per collection.
    pub fn compute(&self, collections: &[&dyn Collection]) -> DriverResult<Vec<Handle>> {
        if collections.is_empty() {
            return Ok(Vec::new());
        }

        let mut graph = optimize_groups(collections);
        let codec = self.core.codec.as_ref();

        // The terminal node reduces each collection's outputs to one value.
        let mut names = Vec::with_capacity(collections.len());
        for collection in collections {
            let outputs = collection.output_keys();
            let mut finalize = collection.finalize();
            finalize
                .args
                .push(Datum::List(outputs.into_iter().map(Datum::Remote).collect()));

            let name = Key::token(format!("finalize-{}", fingerprint(&finalize, codec)?));
            graph.nodes.insert(name.clone(), Node::Task(finalize));
            names.push(name);
        }

        let mut tasks = HashMap::new();
        let mut dependencies = HashMap::new();
        for (key, node) in graph.nodes.iter() {
            tasks.insert(key.clone(), encode_node(node, codec)?);
            dependencies.insert(key.clone(), node_dependencies(node));
        }

        let handles: Vec<Handle> = names
            .iter()
            .map(|name| Handle::new(name.clone(), &self.core))
            .collect();

        self.core.send_to_scheduler(DriverMessage::UpdateGraph {
            tasks,
            dependencies,
            keys: names,
            restrictions: HashMap::new(),
            loose_restrictions: IndexSet::new(),
            client: self.core.id.clone(),
        })?;

        Ok(handles)
    }

    /// `compute`, then gather the concrete values.
    pub fn compute_sync(&self, collections: &[&dyn Collection]) -> DriverResult<Vec<Vec<u8>>> {
        let handles = self.compute(collections)?;
        let keys: Vec<Key> = handles.iter().map(|handle| handle.key().clone()).collect();

        let (mut data, _) = self.core.gather_flat(&keys, ErrorPolicy::Raise)?;

        Ok(keys
            .iter()
            .map(|key| data.remove(key).unwrap_or_default())
            .collect())
    }

    /// Start computing collections in the background and return semantically
    /// identical collections backed by the submitted futures.
    pub fn persist(&self, collections: &[&dyn Collection]) -> DriverResult<Vec<Box<dyn Collection>>> {
        if collections.is_empty() {
            return Ok(Vec::new());
        }

        let graph = optimize_groups(collections);
        let codec = self.core.codec.as_ref();

        let mut names = IndexSet::new();
        for collection in collections {
            names.extend(collection.output_keys());
        }

        let mut tasks = HashMap::new();
        let mut dependencies = HashMap::new();
        for (key, node) in graph.nodes.iter() {
            tasks.insert(key.clone(), encode_node(node, codec)?);
            dependencies.insert(key.clone(), node_dependencies(node));
        }

        let futures: HashMap<Key, Handle> = names
            .iter()
            .map(|key| (key.clone(), Handle::new(key.clone(), &self.core)))
            .collect();

        self.core.send_to_scheduler(DriverMessage::UpdateGraph {
            tasks,
            dependencies,
            keys: names.into_iter().collect(),
            restrictions: HashMap::new(),
            loose_restrictions: IndexSet::new(),
            client: self.core.id.clone(),
        })?;

        Ok(collections
            .iter()
            .map(|collection| collection.rebuild(&futures))
            .collect())
    }

    /// Cancel running computations. Scheduler acknowledgment is
    /// fire-and-forget; the local entries are erased immediately so readers
    /// observe cancellation.
    pub fn cancel(&self, handles: &[Handle]) -> DriverResult<()> {
        let mut keys = IndexSet::new();
        for handle in handles {
            keys.insert(handle.key().clone());
        }

        self.core.cancel_keys(keys.into_iter().collect(), false)
    }

    /// Restart the cluster: kills active work and invalidates every
    /// outstanding handle.
    pub fn restart(&self) -> DriverResult<()> {
        logging::info!(self.core.log, "restarting cluster"; "context" => "restart");

        self.core.restarted.clear();
        self.core.send_to_scheduler(DriverMessage::Restart)?;
        self.core.restarted.wait();

        Ok(())
    }

    /// Upload a local file to every worker through the center. All workers
    /// must acknowledge the full byte count.
    pub fn upload_file<P: AsRef<Path>>(&self, path: P) -> DriverResult<()> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|error| {
            DriverError::Argument(format!("could not read {}: {}", path.display(), error))
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                DriverError::Argument(format!("no usable filename in {}", path.display()))
            })?
            .to_string();
        let size = data.len() as u64;

        let response = self.core.rpc_center.call(&RpcRequest::Broadcast {
            msg: WorkerRequest::UploadFile { filename, data },
        })?;

        let replies = match response {
            RpcResponse::Broadcast { replies } => replies,
            RpcResponse::Error { message } => return Err(DriverError::Rpc(message)),
            other => {
                return Err(DriverError::Rpc(format!(
                    "unexpected broadcast response: {:?}",
                    other
                )))
            }
        };

        for (worker, reply) in &replies {
            if let WorkerReply::Error(message) = reply {
                return Err(DriverError::Upload {
                    worker: worker.clone(),
                    message: message.clone(),
                });
            }
        }

        for (worker, reply) in &replies {
            if let WorkerReply::ByteCount(count) = reply {
                if *count != size {
                    return Err(DriverError::Upload {
                        worker: worker.clone(),
                        message: format!("worker received {} of {} bytes", count, size),
                    });
                }
            }
        }

        Ok(())
    }

    /// Core counts per worker, as reported by the scheduler.
    pub fn ncores(&self) -> DriverResult<HashMap<WorkerAddr, usize>> {
        match self.core.rpc.call(&RpcRequest::Ncores)? {
            RpcResponse::Ncores { cores } => Ok(cores),
            RpcResponse::Error { message } => Err(DriverError::Rpc(message)),
            other => Err(DriverError::Rpc(format!(
                "unexpected ncores response: {:?}",
                other
            ))),
        }
    }

    /// Send the close signal, stop the event loop and wait for it with a
    /// bounded timeout. Clears the process default slot if it still points
    /// here. A loop that outlives the timeout is logged and abandoned.
    pub fn shutdown(&self, timeout: Duration) {
        logging::debug!(self.core.log, "shutting down"; "context" => "shutdown");

        drop(self.core.send_to_scheduler(DriverMessage::CloseStream));
        drop(self.core.send_to_scheduler(DriverMessage::Close));
        drop(self.core.post(LoopMsg::Command(Command::Stop)));

        if self.core.stopped.wait_timeout(timeout) {
            if let Some(thread) = self.core.loop_thread.lock().unwrap().take() {
                drop(thread.join());
            }
        } else {
            logging::warn!(self.core.log, "event loop did not stop in time";
                           "context" => "shutdown");
        }

        let mut slot = DEFAULT_DRIVER.lock().unwrap();
        if let Some(current) = slot.upgrade() {
            if Arc::ptr_eq(&current, &self.core) {
                *slot = Weak::new();
            }
        }
    }

    /// `shutdown` with the configured timeout.
    pub fn shutdown_default(&self) {
        self.shutdown(self.core.config.shutdown_timeout())
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.core.scheduler_addr {
            Some(addr) => write!(f, "<Driver: scheduler={}>", addr),
            None => write!(f, "<Driver: scheduler=local>"),
        }
    }
}

/// Handles scattered back to the caller, matching the input payload shape.
#[derive(Debug)]
pub enum Scattered {
    Seq(Vec<Handle>),
    Named(HashMap<String, Handle>),
}

/// The driver most recently connected in this process, if it is still alive
/// and has not shut down.
pub fn default_driver() -> Option<Driver> {
    DEFAULT_DRIVER
        .lock()
        .unwrap()
        .upgrade()
        .map(|core| Driver { core })
}

/// Block until every handle completes. Timeouts and partial-completion
/// conditions are declared unimplemented.
pub fn wait(
    handles: &[Handle],
    timeout: Option<Duration>,
    return_when: ReturnWhen,
) -> DriverResult<(Vec<Handle>, Vec<Handle>)> {
    if timeout.is_some() {
        return Err(DriverError::Unsupported("wait timeouts"));
    }

    let ReturnWhen::AllCompleted = return_when;

    for handle in handles {
        if let Some(wake) = handle.wake() {
            wake.wait();
        }
    }

    Ok((handles.to_vec(), Vec::new()))
}

/// Yield handles in the order their computations complete. Handles sharing a
/// key are grouped behind one waiter and yielded together.
pub fn as_completed(handles: &[Handle]) -> Flow<Handle> {
    let (tx, flow) = flow_channel(None);

    let mut groups: HashMap<Key, Vec<Handle>> = HashMap::new();
    for handle in handles {
        groups
            .entry(handle.key().clone())
            .or_insert_with(Vec::new)
            .push(handle.clone());
    }

    for (_, group) in groups {
        let tx = tx.clone();

        thread::spawn(move || {
            if let Some(wake) = group[0].wake() {
                wake.wait();
            }
            for handle in group {
                if !tx.send(handle) {
                    break;
                }
            }
        });
    }

    flow
}

/// Merge collection graphs group-by-optimization-hook and run each hook over
/// its combined subgraph.
fn optimize_groups(collections: &[&dyn Collection]) -> Graph {
    let mut groups: Vec<(crate::collection::OptimizeFn, Graph, Vec<Key>)> = Vec::new();

    for collection in collections {
        let hook = collection.optimize();

        match groups.iter_mut().find(|(existing, _, _)| *existing == hook) {
            Some((_, graph, keys)) => {
                graph.merge(collection.graph());
                keys.extend(collection.output_keys());
            }
            None => groups.push((hook, collection.graph(), collection.output_keys())),
        }
    }

    let mut merged = Graph::new();
    for (hook, graph, keys) in groups {
        merged.merge(hook(graph, &keys));
    }

    merged
}
