//! The single mutable chat state every handler operates on.
//!
//! `ChatSim` owns the generator, the log and the spam/voice settings. All
//! mutations go through it and are mirrored to subscribers as [`ChatEvent`]s
//! over a `tokio::sync::broadcast` channel.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::chat_log::{ChatEntry, ChatLog, EntrySource};
use crate::config::{speed_to_bound_ms, volume_to_speed, SimConfig, MAX_SPEED};
use crate::emotes::EmoteTable;
use crate::error::{Result, SimError};
use crate::generator::MessageGenerator;
use crate::voice::RecognizerCommand;

/// Broadcast buffer per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub const VOICE_LISTENING: &str = "[Listening]";
pub const VOICE_OFF: &str = "[Off]";

pub type SharedSim = Arc<Mutex<ChatSim>>;

/// Lock the shared state, recovering the guard if a previous holder panicked.
pub fn lock(sim: &SharedSim) -> MutexGuard<'_, ChatSim> {
    sim.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpamConfig {
    pub category: String,
    /// Slider position, 0-100.
    pub speed: u8,
    /// Upper bound of the random delay between spam messages.
    pub bound_ms: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceStatus {
    pub recording: bool,
    /// Latest transcript, or a `[Listening]` / `[Off]` marker.
    pub output: String,
}

/// Full state, sent to a surface when it (re)connects.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub entries: Vec<ChatEntry>,
    pub spam: SpamConfig,
    pub voice: VoiceStatus,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Append { entry: ChatEntry },
    /// The oldest `count` entries were dropped.
    Trim { count: usize },
    Clear,
    Spam { spam: SpamConfig },
    Voice { voice: VoiceStatus },
    /// Ask a page-hosted recognizer to start or stop listening.
    Recognizer { command: RecognizerCommand },
    Snapshot { snapshot: Snapshot },
}

pub struct ChatSim {
    generator: MessageGenerator,
    emotes: EmoteTable,
    log: ChatLog,
    spam: SpamConfig,
    voice: VoiceStatus,
    next_id: u64,
    /// Bumped on every spam start/stop; a spam task only writes while its
    /// generation is current.
    spam_generation: u64,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatSim {
    pub fn new(config: &SimConfig, generator: MessageGenerator) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            generator,
            emotes: EmoteTable::from_settings(&config.emotes),
            log: ChatLog::new(config.chat.capacity, config.chat.trim_batch),
            spam: SpamConfig {
                category: config.spam.category.clone(),
                speed: config.spam.speed,
                bound_ms: speed_to_bound_ms(config.spam.speed),
                enabled: false,
            },
            voice: VoiceStatus {
                recording: false,
                output: VOICE_OFF.to_string(),
            },
            next_id: 0,
            spam_generation: 0,
            events,
        }
    }

    pub fn shared(self) -> SharedSim {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<ChatEvent> {
        self.events.clone()
    }

    fn emit(&self, event: ChatEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn log(&self) -> &ChatLog {
        &self.log
    }

    pub fn spam(&self) -> &SpamConfig {
        &self.spam
    }

    pub fn voice(&self) -> &VoiceStatus {
        &self.voice
    }

    pub fn emotes(&self) -> &EmoteTable {
        &self.emotes
    }

    pub fn categories(&self) -> Vec<String> {
        self.generator.categories().map(str::to_string).collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.log.to_vec(),
            spam: self.spam.clone(),
            voice: self.voice.clone(),
            categories: self.categories(),
        }
    }

    fn append(&mut self, text: &str, source: EntrySource) -> ChatEntry {
        let segments = self.emotes.substitute(text);
        let html = self.emotes.render_html(&segments);
        let entry = ChatEntry {
            id: self.next_id,
            username: self.generator.username(),
            color: self.generator.username_color(),
            segments,
            html,
            source,
        };
        self.next_id += 1;

        let trimmed = self.log.push(entry.clone());
        self.emit(ChatEvent::Append {
            entry: entry.clone(),
        });
        if trimmed > 0 {
            debug!(trimmed, remaining = self.log.len(), "trimmed chat log");
            self.emit(ChatEvent::Trim { count: trimmed });
        }
        entry
    }

    /// Append one random message from the current category.
    pub fn write_generated(&mut self) -> Result<ChatEntry> {
        let text = self.generator.pick_message(&self.spam.category)?;
        Ok(self.append(&text, EntrySource::Generated))
    }

    /// Post user-typed text under a random username. Blank input posts nothing.
    pub fn submit_text(&mut self, text: &str) -> Option<ChatEntry> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return None;
        }
        Some(self.append(text, EntrySource::Manual))
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.emit(ChatEvent::Clear);
    }

    pub fn set_category(&mut self, category: &str) -> Result<()> {
        if !self.generator.is_selectable(category) {
            return Err(if self.categories().iter().any(|c| c == category) {
                SimError::EmptyCategory(category.to_string())
            } else {
                SimError::UnknownCategory(category.to_string())
            });
        }
        if self.spam.category != category {
            info!(from = %self.spam.category, to = category, "spam category changed");
            self.spam.category = category.to_string();
        }
        self.emit(ChatEvent::Spam {
            spam: self.spam.clone(),
        });
        Ok(())
    }

    /// Set the 0-100 speed slider. Returns the new delay bound in ms.
    pub fn set_speed(&mut self, speed: i64) -> Result<u64> {
        let speed = u8::try_from(speed)
            .ok()
            .filter(|s| *s <= MAX_SPEED)
            .ok_or(SimError::InvalidSpeed(speed))?;
        self.apply_speed(speed);
        info!(speed, bound_ms = self.spam.bound_ms, "spam speed changed");
        Ok(self.spam.bound_ms)
    }

    /// Drive the speed slider from a microphone level in `[0, 1]`. Levels
    /// arrive several times a second, so an unchanged slider emits nothing.
    pub fn set_volume(&mut self, level: f64) -> Result<u64> {
        let speed = volume_to_speed(level).ok_or(SimError::InvalidVolume(level))?;
        if speed != self.spam.speed {
            self.apply_speed(speed);
            debug!(level, speed, bound_ms = self.spam.bound_ms, "speed follows volume");
        }
        Ok(self.spam.bound_ms)
    }

    fn apply_speed(&mut self, speed: u8) {
        self.spam.speed = speed;
        self.spam.bound_ms = speed_to_bound_ms(speed);
        self.emit(ChatEvent::Spam {
            spam: self.spam.clone(),
        });
    }

    /// Update the recording flag and, optionally, the voice output line.
    pub fn set_voice(&mut self, recording: bool, output: Option<&str>) {
        self.voice.recording = recording;
        if let Some(output) = output {
            self.voice.output = output.to_string();
        }
        self.emit(ChatEvent::Voice {
            voice: self.voice.clone(),
        });
    }

    pub(crate) fn begin_spam(&mut self) -> u64 {
        self.spam_generation += 1;
        self.spam.enabled = true;
        self.emit(ChatEvent::Spam {
            spam: self.spam.clone(),
        });
        self.spam_generation
    }

    pub(crate) fn end_spam(&mut self) {
        self.spam_generation += 1;
        self.spam.enabled = false;
        self.emit(ChatEvent::Spam {
            spam: self.spam.clone(),
        });
    }

    /// One spam firing: write a message and draw the next delay. `None` means
    /// the caller's generation has been stopped.
    pub(crate) fn spam_tick(&mut self, generation: u64) -> Option<Duration> {
        if generation != self.spam_generation || !self.spam.enabled {
            return None;
        }
        if let Err(e) = self.write_generated() {
            warn!(error = %e, "spam message skipped");
        }
        let delay = self.generator.spam_delay_ms(self.spam.bound_ms);
        Some(Duration::from_millis(delay))
    }
}
