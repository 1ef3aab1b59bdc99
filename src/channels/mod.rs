//! Command front ends
//!
//! A gateway turns user commands into session manager calls and renders
//! the outcome as text. Listen cycles always run on their own task so the
//! front end keeps answering commands.

mod console;
#[cfg(feature = "discord")]
mod discord;
#[cfg(feature = "audio-io")]
mod speaker;

pub use console::{ConsoleCommand, ConsoleGateway, LOCAL_GUILD};
#[cfg(feature = "discord")]
pub use discord::{DiscordGateway, SongbirdConnector};
#[cfg(feature = "audio-io")]
pub use speaker::{SpeakerConnection, SpeakerConnector};

use crate::Result;
use crate::Error;
use crate::session::{JoinAck, PipelineResult, SessionState};

/// Acknowledgement sent as soon as a listen command is accepted
pub const LISTENING: &str = "Listening...";

/// Shown when a cycle ends without recognized speech
pub const NOT_UNDERSTOOD: &str = "I couldn't understand that!";

/// Text for the outcome of a join
#[must_use]
pub fn join_reply(outcome: &Result<JoinAck>) -> String {
    match outcome {
        Ok(ack) => format!("Joined {}!", ack.channel.name),
        Err(e) => e.user_message().to_string(),
    }
}

/// Text for the outcome of a leave
#[must_use]
pub fn leave_reply(outcome: &Result<()>) -> String {
    match outcome {
        Ok(()) => "Disconnected!".to_string(),
        Err(e) => e.user_message().to_string(),
    }
}

/// First answer to a listen command
///
/// Sessions that cannot listen right now are refused up front instead of
/// being acknowledged with [`LISTENING`].
///
/// # Errors
///
/// Returns the refusal text if the session is not `Connected`
pub fn listen_ack(state: SessionState) -> std::result::Result<&'static str, &'static str> {
    match state {
        SessionState::Connected => Ok(LISTENING),
        SessionState::Disconnected | SessionState::Listening => {
            Err(Error::NotConnected.user_message())
        }
    }
}

/// Text for the outcome of a listen cycle
#[must_use]
pub fn listen_reply(outcome: &Result<PipelineResult>) -> String {
    match outcome {
        Ok(PipelineResult {
            transcript,
            reply: Some(reply),
        }) => format!("🎙️ **You said:** {transcript}\n🔊 **Bot replied:** {reply}"),
        Ok(PipelineResult { reply: None, .. }) => NOT_UNDERSTOOD.to_string(),
        Err(e) => e.user_message().to_string(),
    }
}
