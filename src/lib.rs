//! chatstorm: a local live-stream chat simulator.
//!
//! A [`ChatApp`] owns the shared [`state::ChatSim`], the spam loop and the
//! voice pipeline. The web page ([`web`]) and the terminal ([`terminal`]) are
//! surfaces over it: they call its operations and render the
//! [`state::ChatEvent`] stream.

pub mod app;
pub mod chat_log;
pub mod cli;
pub mod config;
pub mod emotes;
pub mod error;
pub mod generator;
pub mod spam;
pub mod state;
pub mod telemetry;
pub mod terminal;
pub mod voice;
pub mod web;

pub use app::ChatApp;
pub use chat_log::{ChatEntry, ChatLog, EntrySource};
pub use config::SimConfig;
pub use emotes::{EmoteTable, Segment};
pub use error::{Result, SimError};
pub use generator::MessageGenerator;
pub use state::{ChatEvent, Snapshot};
