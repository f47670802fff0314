//! # Audio Module
//!
//! Per-guild playback sessions for the bot.
//!
//! Every guild gets one [`Session`] holding its queue, its repeat and shuffle
//! settings, and the binding to the external player. Sessions live in the
//! [`SessionManager`], which creates them on first use (restoring whatever was
//! saved for that guild) and drops them once the guild goes quiet.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - One async mutex guards every mutation of the queue
//! - Dequeue policy depends on the [`RepeatMode`]
//! - Shuffled queues splice new tracks into random positions
//!
//! ### [`shuffle`] - Shuffle Engine
//! - Fisher–Yates permutation over the OS CSPRNG
//!
//! ### [`player`] / [`songbird_player`] - Player Binding
//! - `Disconnected | Connected` binding; every control is a no-op while disconnected
//! - Track-finished notifications arrive as [`PlayerEvent`] messages
//!
//! ### [`persistence`] - Snapshots
//! - Repeat mode, shuffle flag, volume and queue written field by field
//! - Requesters are resolved again on load, one lookup per distinct member
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_music::audio::{SessionManager, Track, TrackItem, Requester};
//! use serenity::all::{ChannelId, GuildId, UserId};
//!
//! # async fn example(sessions: &SessionManager) -> guild_music::error::Result<()> {
//! let session = sessions.get_or_load(GuildId::new(123456789)).await?;
//!
//! let track = Track::new("Song", "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
//! let requester = Requester::new(UserId::new(42), "dj");
//! session.enqueue(TrackItem::new(track, requester)).await;
//!
//! session.create_player(ChannelId::new(987654321)).await?;
//! session.play().await?;
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod persistence;
pub mod player;
pub mod queue;
pub mod session;
pub mod shuffle;
pub mod songbird_player;
pub mod track;

pub use manager::SessionManager;
pub use player::{PlayerBinding, PlayerConnection, PlayerEvent, PlayerNode};
pub use queue::RepeatMode;
pub use session::{SeekTarget, Session, SessionContext};
pub use track::{Requester, Track, TrackItem};
