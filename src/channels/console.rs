//! Local console gateway
//!
//! Reads commands line by line and drives a single local session. Replies
//! are written as plain lines to the output.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::{join_reply, leave_reply, listen_ack, listen_reply};
use crate::Result;
use crate::session::{SessionManager, SessionState};
use crate::voice::VoiceChannel;

/// Guild key of the console's session
pub const LOCAL_GUILD: u64 = 0;

/// Channel name used when `join` is given none
const DEFAULT_CHANNEL: &str = "speaker";

const HELP: &str = "Commands: join [channel], leave, listen, status, help, quit";

/// A console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Join, optionally naming the channel
    Join(Option<String>),
    /// Leave the channel
    Leave,
    /// Run one listen cycle
    Listen,
    /// Show the session state
    Status,
    /// List commands
    Help,
    /// Stop the console, interrupting any running cycle
    Quit,
}

impl ConsoleCommand {
    /// Parse a line; `/` prefixes are accepted
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match name.to_lowercase().as_str() {
            "join" => Some(Self::Join((!rest.is_empty()).then(|| rest.to_string()))),
            "leave" => Some(Self::Leave),
            "listen" => Some(Self::Listen),
            "status" => Some(Self::Status),
            "help" | "?" => Some(Self::Help),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Drives the local session from a line-oriented input
pub struct ConsoleGateway {
    sessions: Arc<SessionManager>,
}

impl ConsoleGateway {
    /// Create a console over a session manager
    #[must_use]
    pub const fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Serve commands until `quit` or end of input
    ///
    /// At end of input running cycles are allowed to finish; `quit`
    /// interrupts them. The session is left either way.
    ///
    /// # Errors
    ///
    /// Returns error if reading input or writing output fails
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let output = Arc::new(Mutex::new(output));
        let mut lines = input.lines();
        let mut cycles = JoinSet::new();
        let mut interrupted = false;

        write_line(&output, HELP).await?;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let Some(command) = ConsoleCommand::parse(&line) else {
                write_line(&output, &format!("Unknown command. {HELP}")).await?;
                continue;
            };
            tracing::debug!(?command, "console command");

            match command {
                ConsoleCommand::Join(name) => {
                    let channel = VoiceChannel {
                        id: LOCAL_GUILD,
                        name: name.unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
                    };
                    let outcome = self.sessions.join(LOCAL_GUILD, Some(channel)).await;
                    write_line(&output, &join_reply(&outcome)).await?;
                }
                ConsoleCommand::Leave => {
                    let outcome = self.sessions.leave(LOCAL_GUILD).await;
                    write_line(&output, &leave_reply(&outcome)).await?;
                }
                ConsoleCommand::Listen => {
                    match listen_ack(self.sessions.state(LOCAL_GUILD)) {
                        Ok(ack) => write_line(&output, ack).await?,
                        Err(refusal) => {
                            write_line(&output, refusal).await?;
                            continue;
                        }
                    }
                    let sessions = Arc::clone(&self.sessions);
                    let output = Arc::clone(&output);
                    cycles.spawn(async move {
                        let outcome = sessions.listen(LOCAL_GUILD).await;
                        write_line(&output, &listen_reply(&outcome)).await
                    });
                }
                ConsoleCommand::Status => {
                    let status = match self.sessions.state(LOCAL_GUILD) {
                        SessionState::Disconnected => "disconnected".to_string(),
                        SessionState::Connected => self.describe_channel("connected to"),
                        SessionState::Listening => self.describe_channel("listening in"),
                    };
                    write_line(&output, &status).await?;
                }
                ConsoleCommand::Help => write_line(&output, HELP).await?,
                ConsoleCommand::Quit => {
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            self.shutdown().await;
            drain(&mut cycles).await;
        } else {
            drain(&mut cycles).await;
            self.shutdown().await;
        }

        output.lock().await.flush().await?;
        Ok(())
    }

    fn describe_channel(&self, prefix: &str) -> String {
        let name = self
            .sessions
            .channel(LOCAL_GUILD)
            .map_or_else(|| DEFAULT_CHANNEL.to_string(), |c| c.name);
        format!("{prefix} {name}")
    }

    async fn shutdown(&self) {
        if self.sessions.state(LOCAL_GUILD) != SessionState::Disconnected
            && let Err(e) = self.sessions.leave(LOCAL_GUILD).await
        {
            tracing::debug!(error = %e, "console session already gone");
        }
    }
}

async fn drain(cycles: &mut JoinSet<Result<()>>) {
    while let Some(finished) = cycles.join_next().await {
        match finished {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to write listen result"),
            Err(e) => tracing::error!(error = %e, "listen task failed"),
        }
    }
}

async fn write_line<W>(output: &Mutex<W>, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut output = output.lock().await;
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
