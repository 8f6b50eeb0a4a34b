use crate::registry::Registry;
use crate::transport::EventWriter;
use crate::wake::Wake;
use conduit::logging;
use conduit::message::{DriverMessage, SchedulerMessage};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Work posted onto the loop by user threads.
pub(crate) enum Command {
    /// Place one message on the transport.
    Send(DriverMessage),
    /// Stop the loop without touching the transport.
    Stop,
}

pub(crate) enum LoopMsg {
    Command(Command),
    Event(SchedulerMessage),
}

/// The driver's event loop. One instance runs on a dedicated background
/// thread for the driver's lifetime; it alone owns the event-stream writer
/// and performs every event-driven registry transition.
pub(crate) struct Reactor {
    mailbox: Receiver<LoopMsg>,
    writer: EventWriter,
    registry: Arc<Registry>,

    // Handshake and lifecycle signals
    started: Arc<Wake>,
    restarted: Arc<Wake>,
    stopped: Arc<Wake>,

    // Log
    log: logging::Logger,
}

impl Reactor {
    /// Idle tick keeping the loop responsive while the mailbox is quiet.
    const TICK: Duration = Duration::from_secs(1);

    pub fn new(
        mailbox: Receiver<LoopMsg>,
        writer: EventWriter,
        registry: Arc<Registry>,
        started: Arc<Wake>,
        restarted: Arc<Wake>,
        stopped: Arc<Wake>,
        log: logging::Logger,
    ) -> Reactor {
        Reactor {
            mailbox,
            writer,
            registry,
            started,
            restarted,
            stopped,
            log,
        }
    }

    /// Run until the transport closes or a stop command arrives.
    pub fn run(mut self) {
        logging::debug!(self.log, "event loop running"; "context" => "run");

        loop {
            match self.mailbox.recv_timeout(Self::TICK) {
                Ok(LoopMsg::Command(command)) => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Ok(LoopMsg::Event(event)) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.stopped.set();
        logging::debug!(self.log, "event loop stopped"; "context" => "run");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send(msg) => {
                if let Err(error) = self.writer.send(&msg) {
                    logging::warn!(self.log, "send to scheduler failed";
                                   "context" => "send", "error" => %error);
                }
                false
            }
            Command::Stop => true,
        }
    }

    fn handle_event(&mut self, event: SchedulerMessage) -> bool {
        match event {
            SchedulerMessage::StreamStart => {
                self.started.set();
                false
            }
            SchedulerMessage::Close => true,
            SchedulerMessage::KeyInMemory { key, type_name } => {
                logging::trace!(self.log, "key in memory"; "context" => "report", "key" => %key);
                self.registry.mark_finished(&key, type_name);
                false
            }
            SchedulerMessage::LostData { key } => {
                logging::debug!(self.log, "data lost"; "context" => "report", "key" => %key);
                self.registry.mark_lost(&key);
                false
            }
            SchedulerMessage::CancelledKey { key } => {
                self.registry.cancel_key(&key);
                false
            }
            SchedulerMessage::TaskErred {
                key,
                exception,
                traceback,
            } => {
                logging::debug!(self.log, "task erred"; "context" => "report", "key" => %key);
                self.registry.mark_erred(&key, exception, traceback);
                false
            }
            SchedulerMessage::Restart => {
                let woken = self.registry.clear_all();
                logging::info!(self.log, "restart signal from scheduler";
                               "context" => "report", "woken" => woken);
                self.restarted.set();
                false
            }
            SchedulerMessage::SchedulerError { exception } => {
                logging::warn!(self.log, "scheduler error";
                               "context" => "report", "exception" => exception.as_str());
                false
            }
        }
    }
}
