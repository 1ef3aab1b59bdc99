//! Per-guild voice sessions
//!
//! Each guild moves through `Disconnected -> Connected -> Listening ->
//! Connected`. `Listening` only lasts as long as one pipeline run and is
//! always unwound back to `Connected`, whichever way the run ends.

mod pipeline;

pub use pipeline::{Pipeline, PipelineResult};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::voice::{VoiceChannel, VoiceConnection, VoiceConnector};
use crate::{Error, Result};

/// Lifecycle state of a guild's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists
    Disconnected,
    /// Joined and idle
    Connected,
    /// A listen cycle is running
    Listening,
}

/// Acknowledgement of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAck {
    /// Guild the session belongs to
    pub guild_id: u64,

    /// Channel that was joined
    pub channel: VoiceChannel,
}

struct VoiceSession {
    id: u64,
    channel: VoiceChannel,
    connection: Arc<dyn VoiceConnection>,
    state: SessionState,
    cancel: Option<CancellationToken>,
}

impl VoiceSession {
    /// Cancel any running cycle and drop the connection
    async fn teardown(self, guild_id: u64) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        if let Err(e) = self.connection.disconnect().await {
            tracing::warn!(guild_id, error = %e, "disconnect failed");
        }
        tracing::debug!(guild_id, session_id = self.id, "session torn down");
    }
}

type SessionMap = Arc<Mutex<HashMap<u64, VoiceSession>>>;

fn lock(sessions: &SessionMap) -> MutexGuard<'_, HashMap<u64, VoiceSession>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every guild's session and runs listen cycles for them
///
/// The session map lock is never held across an await; connections are
/// cloned out before any stage runs. Joins and leaves of one guild run one
/// at a time, since transports may hand out one shared call per guild.
pub struct SessionManager {
    sessions: SessionMap,
    membership: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
    connector: Arc<dyn VoiceConnector>,
    pipeline: Arc<Pipeline>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a manager with injected voice transport and pipeline
    #[must_use]
    pub fn new(connector: Arc<dyn VoiceConnector>, pipeline: Pipeline) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            membership: Mutex::new(HashMap::new()),
            connector,
            pipeline: Arc::new(pipeline),
            next_id: AtomicU64::new(1),
        }
    }

    /// Lock serializing joins and leaves of `guild_id`
    fn membership(&self, guild_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(guild_id).or_default())
    }

    /// Pipeline shared by every session
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Current state of a guild's session
    #[must_use]
    pub fn state(&self, guild_id: u64) -> SessionState {
        lock(&self.sessions)
            .get(&guild_id)
            .map_or(SessionState::Disconnected, |s| s.state)
    }

    /// Channel a guild's session is connected to
    #[must_use]
    pub fn channel(&self, guild_id: u64) -> Option<VoiceChannel> {
        lock(&self.sessions)
            .get(&guild_id)
            .map(|s| s.channel.clone())
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Join `channel` in `guild_id`
    ///
    /// An existing session for the guild is torn down first, so repeated
    /// joins never leave a second connection behind.
    ///
    /// # Errors
    ///
    /// Returns `NoChannel` if the requesting user is not in a voice channel,
    /// or the connector's error if connecting fails
    pub async fn join(&self, guild_id: u64, channel: Option<VoiceChannel>) -> Result<JoinAck> {
        let channel = channel.ok_or(Error::NoChannel)?;
        let membership = self.membership(guild_id);
        let _membership = membership.lock().await;

        let previous = lock(&self.sessions).remove(&guild_id);
        if let Some(previous) = previous {
            tracing::info!(guild_id, "replacing existing session");
            previous.teardown(guild_id).await;
        }

        let connection = self.connector.connect(guild_id, &channel).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.sessions).insert(
            guild_id,
            VoiceSession {
                id,
                channel: channel.clone(),
                connection,
                state: SessionState::Connected,
                cancel: None,
            },
        );

        tracing::info!(guild_id, session_id = id, channel = %channel.name, "joined voice channel");
        Ok(JoinAck { guild_id, channel })
    }

    /// Leave the guild's voice channel
    ///
    /// A running listen cycle is cancelled and ends with `Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the guild has no session
    pub async fn leave(&self, guild_id: u64) -> Result<()> {
        let membership = self.membership(guild_id);
        let _membership = membership.lock().await;

        let session = lock(&self.sessions)
            .remove(&guild_id)
            .ok_or(Error::NotConnected)?;
        session.teardown(guild_id).await;

        tracing::info!(guild_id, "left voice channel");
        Ok(())
    }

    /// Run one listen cycle on the guild's connection
    ///
    /// The cycle runs on its own task, so dropping this future does not
    /// abandon the session in `Listening`.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the guild has no session or is already
    /// listening (state is left untouched), otherwise the first failing
    /// stage's error
    pub async fn listen(&self, guild_id: u64) -> Result<PipelineResult> {
        let (id, connection, cancel) = {
            let mut sessions = lock(&self.sessions);
            let session = sessions.get_mut(&guild_id).ok_or(Error::NotConnected)?;
            if session.state != SessionState::Connected {
                return Err(Error::NotConnected);
            }

            let cancel = CancellationToken::new();
            session.state = SessionState::Listening;
            session.cancel = Some(cancel.clone());
            (session.id, Arc::clone(&session.connection), cancel)
        };

        tracing::info!(guild_id, session_id = id, "listening");

        let restore = RestoreConnected {
            sessions: Arc::clone(&self.sessions),
            guild_id,
            session_id: id,
        };
        let pipeline = Arc::clone(&self.pipeline);
        let task = tokio::spawn(async move {
            let _restore = restore;
            pipeline.run(guild_id, connection.as_ref(), &cancel).await
        });

        let result = task
            .await
            .map_err(|e| Error::Task(format!("listen task failed: {e}")))?;

        match &result {
            Ok(outcome) => tracing::info!(
                guild_id,
                transcript = %outcome.transcript,
                replied = outcome.reply.is_some(),
                "listen cycle complete"
            ),
            Err(Error::Cancelled) => tracing::info!(guild_id, "listen cycle cancelled"),
            Err(e) => tracing::warn!(guild_id, error = %e, "listen cycle failed"),
        }

        result
    }
}

/// Puts a listening session back to `Connected` when the cycle ends
///
/// Does nothing if the session was removed or replaced in the meantime.
struct RestoreConnected {
    sessions: SessionMap,
    guild_id: u64,
    session_id: u64,
}

impl Drop for RestoreConnected {
    fn drop(&mut self) {
        let mut sessions = lock(&self.sessions);
        if let Some(session) = sessions.get_mut(&self.guild_id)
            && session.id == self.session_id
        {
            session.state = SessionState::Connected;
            session.cancel = None;
        }
    }
}
