use crate::error::{DriverError, DriverResult};
use crate::reactor::LoopMsg;
use conduit::frame::{read_frame, write_frame};
use conduit::logging;
use conduit::message::{ClientId, DriverMessage, RpcRequest, RpcResponse, SchedulerMessage};
use conduit::support::{WireError, WireResult, WorkerAddr};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Capability handle to an in-process scheduler. The driver holds this
/// reference; the scheduler holds only its ends of the queue pair, so there
/// is no mutual ownership between the two.
pub trait LocalScheduler: Send + Sync {
    /// Attach a client, returning the driver's send half and its event
    /// receiver. The scheduler must emit `stream-start` as the first event on
    /// the returned receiver.
    fn attach(&self, client: &ClientId) -> (Sender<DriverMessage>, Receiver<SchedulerMessage>);

    /// Request/response call answered directly by the scheduler.
    fn rpc(&self, request: RpcRequest) -> RpcResponse;
}

/// Request/response channel to the scheduler. The remote mode dials a fresh
/// framed connection per call, so calls from different user threads never
/// contend on a shared stream.
#[derive(Clone)]
pub enum Rpc {
    Local(Arc<dyn LocalScheduler>),
    Remote { addr: WorkerAddr, timeout: Duration },
}

impl Rpc {
    pub fn call(&self, request: &RpcRequest) -> DriverResult<RpcResponse> {
        match self {
            Rpc::Local(scheduler) => Ok(scheduler.rpc(request.clone())),
            Rpc::Remote { addr, timeout } => {
                let mut stream = connect(addr, *timeout)?;
                write_frame(&mut stream, request)?;
                let response = read_frame(&mut stream)?;
                drop(stream.shutdown(Shutdown::Both));
                Ok(response)
            }
        }
    }
}

/// Dial a worker or scheduler address with a bounded connect.
pub(crate) fn connect(addr: &WorkerAddr, timeout: Duration) -> DriverResult<TcpStream> {
    let candidates = (addr.host.as_str(), addr.port)
        .to_socket_addrs()
        .map_err(WireError::from)?;

    let mut last = WireError::AddrParse;

    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last = error.into(),
        }
    }

    Err(DriverError::Wire(last))
}

/// Loop-owned send half of the event stream. User threads never touch this
/// directly; they post `Command::Send` onto the loop instead.
pub(crate) enum EventWriter {
    Local(Sender<DriverMessage>),
    Remote(TcpStream),
}

impl EventWriter {
    pub fn send(&mut self, msg: &DriverMessage) -> DriverResult<()> {
        match self {
            EventWriter::Local(tx) => tx.send(msg.clone()).map_err(DriverError::from),
            EventWriter::Remote(stream) => Ok(write_frame(stream, msg)?),
        }
    }
}

/// Receive half of the event stream, drained by a dedicated reader thread.
pub(crate) enum EventSource {
    Local(Receiver<SchedulerMessage>),
    Remote(TcpStream),
}

fn next_event(source: &mut EventSource) -> WireResult<SchedulerMessage> {
    match source {
        EventSource::Local(rx) => rx.recv().map_err(|_| WireError::Closed),
        EventSource::Remote(stream) => read_frame(stream),
    }
}

/// Pump inbound scheduler events into the reactor mailbox. A closed or
/// broken stream is forwarded as `close` so the loop exits cleanly.
pub(crate) fn spawn_reader(
    mut source: EventSource,
    mailbox: Sender<LoopMsg>,
    log: logging::Logger,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let event = match next_event(&mut source) {
            Ok(event) => event,
            Err(error) => {
                logging::debug!(log, "event stream ended"; "context" => "reader", "error" => %error);
                SchedulerMessage::Close
            }
        };

        let closing = event == SchedulerMessage::Close;

        if mailbox.send(LoopMsg::Event(event)).is_err() || closing {
            break;
        }
    })
}
