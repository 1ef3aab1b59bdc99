//! Discord gateway using serenity slash commands and songbird voice

use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serenity::Client;
use serenity::all::{
    ChannelId, Command, CommandInteraction, Context, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EventHandler,
    GatewayIntents, GuildId, Interaction, Ready,
};
use songbird::input::{Input, RawAdapter};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{Call, SerenityInit, Songbird};

use super::{join_reply, leave_reply, listen_ack, listen_reply};
use crate::session::SessionManager;
use crate::voice::{AudioClip, Transcoder, VoiceChannel, VoiceConnection, VoiceConnector};
use crate::{Error, Result};

/// Discord voice output rate
const DISCORD_SAMPLE_RATE: u32 = 48_000;

/// Discord voice output channels
const DISCORD_CHANNELS: u16 = 2;

/// Joins guild voice channels through songbird
pub struct SongbirdConnector {
    manager: Arc<Songbird>,
    transcoder: Transcoder,
}

impl SongbirdConnector {
    /// Create a connector over a songbird manager
    #[must_use]
    pub const fn new(manager: Arc<Songbird>, transcoder: Transcoder) -> Self {
        Self {
            manager,
            transcoder,
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn connect(
        &self,
        guild_id: u64,
        channel: &VoiceChannel,
    ) -> Result<Arc<dyn VoiceConnection>> {
        let guild = GuildId::new(guild_id);
        let call = self
            .manager
            .join(guild, ChannelId::new(channel.id))
            .await
            .map_err(|e| Error::Channel(format!("failed to join voice channel: {e}")))?;

        Ok(Arc::new(SongbirdConnection {
            manager: Arc::clone(&self.manager),
            guild,
            call,
            transcoder: self.transcoder.clone(),
            current: Mutex::new(None),
        }))
    }
}

/// One guild's songbird call
struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    transcoder: Transcoder,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdConnection {
    fn current(&self) -> Option<TrackHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn is_playing(&self) -> Result<bool> {
        let Some(track) = self.current() else {
            return Ok(false);
        };

        // A finished track rejects control messages
        Ok(track
            .get_info()
            .await
            .is_ok_and(|state| state.playing == PlayMode::Play))
    }

    async fn stop(&self) -> Result<()> {
        self.call.lock().await.stop();
        Ok(())
    }

    async fn play(&self, clip: AudioClip) -> Result<()> {
        let pcm = self
            .transcoder
            .to_f32le(&clip, DISCORD_SAMPLE_RATE, DISCORD_CHANNELS)
            .await
            .map_err(|e| Error::Playback(e.to_string()))?;

        let input: Input =
            RawAdapter::new(Cursor::new(pcm), DISCORD_SAMPLE_RATE, u32::from(DISCORD_CHANNELS))
                .into();
        let track = self.call.lock().await.play_input(input);

        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(track);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Songbird keeps one call per guild; leave it alone once replaced
        let ours = self
            .manager
            .get(self.guild)
            .is_some_and(|call| Arc::ptr_eq(&call, &self.call));
        if !ours {
            tracing::debug!(guild_id = self.guild.get(), "call already replaced");
            return Ok(());
        }

        self.manager
            .remove(self.guild)
            .await
            .map_err(|e| Error::Channel(format!("failed to leave voice channel: {e}")))
    }
}

/// Discord front end for a session manager
pub struct DiscordGateway {
    token: String,
    sessions: Arc<SessionManager>,
    manager: Arc<Songbird>,
}

impl DiscordGateway {
    /// Create a gateway
    ///
    /// `manager` must be the songbird instance the session manager's
    /// connector joins through.
    #[must_use]
    pub const fn new(token: String, sessions: Arc<SessionManager>, manager: Arc<Songbird>) -> Self {
        Self {
            token,
            sessions,
            manager,
        }
    }

    /// Connect to Discord and serve commands until the client stops
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built or the connection fails
    pub async fn run(self) -> Result<()> {
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

        let handler = DiscordHandler {
            sessions: self.sessions,
        };

        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .register_songbird_with(self.manager)
            .await
            .map_err(|e| Error::Channel(format!("Discord client error: {e}")))?;

        tracing::info!("Discord gateway starting");
        client
            .start()
            .await
            .map_err(|e| Error::Channel(format!("Discord client error: {e}")))
    }
}

struct DiscordHandler {
    sessions: Arc<SessionManager>,
}

impl DiscordHandler {
    async fn handle(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        let Some(guild_id) = command.guild_id else {
            return respond(ctx, command, "This only works in a server.").await;
        };

        match command.data.name.as_str() {
            "join" => {
                let channel = requester_channel(ctx, guild_id, command);
                let outcome = self.sessions.join(guild_id.get(), channel).await;
                respond(ctx, command, &join_reply(&outcome)).await
            }
            "leave" => {
                let outcome = self.sessions.leave(guild_id.get()).await;
                respond(ctx, command, &leave_reply(&outcome)).await
            }
            "listen" => {
                match listen_ack(self.sessions.state(guild_id.get())) {
                    Ok(ack) => respond(ctx, command, ack).await?,
                    Err(refusal) => return respond(ctx, command, refusal).await,
                }

                let sessions = Arc::clone(&self.sessions);
                let ctx = ctx.clone();
                let command = command.clone();
                tokio::spawn(async move {
                    let outcome = sessions.listen(guild_id.get()).await;
                    let followup = CreateInteractionResponseFollowup::new()
                        .content(listen_reply(&outcome))
                        .ephemeral(true);
                    if let Err(e) = command.create_followup(&ctx.http, followup).await {
                        tracing::warn!(error = %e, "failed to send listen result");
                    }
                });
                Ok(())
            }
            other => {
                tracing::debug!(command = other, "unknown command");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "Discord bot ready");

        let commands = vec![
            CreateCommand::new("join").description("Join your voice channel"),
            CreateCommand::new("leave").description("Leave the voice channel"),
            CreateCommand::new("listen").description("Listen, then reply out loud"),
        ];
        if let Err(e) = Command::set_global_commands(&ctx.http, commands).await {
            tracing::error!(error = %e, "failed to register commands");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        tracing::debug!(
            command = %command.data.name,
            user = %command.user.name,
            "command received"
        );

        if let Err(e) = self.handle(&ctx, &command).await {
            tracing::warn!(error = %e, "failed to answer command");
        }
    }
}

/// Voice channel the invoking user is sitting in
fn requester_channel(
    ctx: &Context,
    guild_id: GuildId,
    command: &CommandInteraction,
) -> Option<VoiceChannel> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel_id = guild.voice_states.get(&command.user.id)?.channel_id?;
    let name = guild
        .channels
        .get(&channel_id)
        .map_or_else(|| channel_id.to_string(), |c| c.name.clone());

    Some(VoiceChannel {
        id: channel_id.get(),
        name,
    })
}

async fn respond(ctx: &Context, command: &CommandInteraction, text: &str) -> Result<()> {
    let message = CreateInteractionResponseMessage::new()
        .content(text)
        .ephemeral(true);
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
        .map_err(|e| Error::Channel(format!("failed to respond: {e}")))
}
