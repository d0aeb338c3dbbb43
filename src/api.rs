use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use poem::{
    IntoResponse, handler,
    web::{
        Data,
        websocket::{Message, WebSocket},
    },
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::backend::{ComposeBackend, Orchestrator, SystemRunner};
use crate::controller::{ControlError, Controller};
use crate::store::{ArtifactSource, HttpSource};
use crate::types::{Command, CommandName};

/// Reply sent for command names outside the known set. The connection stays
/// open.
pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command";

/// What to do with one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A complete command is ready to run.
    Dispatch(Command),
    /// The command needs an argument; wait for the next frame.
    AwaitArgument(CommandName),
    /// The frame did not name a known command.
    Unknown(String),
}

/// Per-connection protocol state. A frame is either a command name or, right
/// after a command that takes one, that command's argument.
#[derive(Debug, Default)]
pub struct Session {
    pending: Option<CommandName>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, frame: String) -> Step {
        if let Some(name) = self.pending.take() {
            return Step::Dispatch(Command::with_argument(name, frame));
        }
        let Ok(name) = CommandName::from_str(frame.trim()) else {
            return Step::Unknown(frame);
        };
        match Command::without_argument(name) {
            Some(command) => Step::Dispatch(command),
            None => {
                self.pending = Some(name);
                Step::AwaitArgument(name)
            }
        }
    }
}

/// Serve one connection until the peer leaves, a read or write fails, or a
/// command fails fatally. Fatal errors are forwarded on `fatal` for the
/// top-level controller to act on.
pub async fn serve_connection<St, Si, E, O, S>(
    mut inbound: St,
    mut outbound: Si,
    controller: &Controller<O, S>,
    fatal: &UnboundedSender<ControlError>,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
    O: Orchestrator,
    S: ArtifactSource,
{
    let mut session = Session::new();
    while let Some(message) = inbound.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Ignoring non UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "Failed to read from connection");
                break;
            }
        };

        let reply = match session.feed(frame) {
            Step::Dispatch(command) => match controller.dispatch(command).await {
                Ok(result) => result.into_lines(),
                Err(err) => {
                    // The receiver only goes away while the process is exiting.
                    let _ = fatal.send(err);
                    break;
                }
            },
            Step::AwaitArgument(name) => {
                debug!(command = %name, "Waiting for argument");
                continue;
            }
            Step::Unknown(frame) => {
                warn!(%frame, "Unknown command");
                vec![UNKNOWN_COMMAND_REPLY.to_string()]
            }
        };

        for line in reply {
            if let Err(err) = outbound.send(Message::Text(line)).await {
                warn!(error = %err, "Failed to write to connection");
                return;
            }
        }
    }
    info!("Connection closed");
}

/// Controller wired to the real compose tool and HTTP store.
pub type LiveController = Controller<ComposeBackend<SystemRunner>, HttpSource>;

/// State shared by every connection.
pub struct ChannelState {
    pub controller: LiveController,
    pub fatal: UnboundedSender<ControlError>,
}

#[handler]
pub fn ws(ws: WebSocket, state: Data<&Arc<ChannelState>>) -> impl IntoResponse {
    let state = Arc::clone(state.0);
    ws.on_upgrade(move |socket| async move {
        info!("Connection opened");
        let (outbound, inbound) = socket.split();
        serve_connection(inbound, outbound, &state.controller, &state.fatal).await;
    })
}
