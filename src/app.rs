//! Wires the shared state, the spam driver and the voice pipeline together.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::chat_log::ChatEntry;
use crate::config::SimConfig;
use crate::error::Result;
use crate::generator::MessageGenerator;
use crate::spam::SpamDriver;
use crate::state::{lock, ChatEvent, ChatSim, SharedSim, Snapshot, SpamConfig};
use crate::voice::{
    KeywordRules, RecognitionEvent, RecognizerLink, SpeechRecognizer, VoiceControl, VoiceHandler,
};

/// Everything a surface (web page, terminal) needs to drive the chat.
pub struct ChatApp {
    sim: SharedSim,
    spam: SpamDriver,
    voice: VoiceControl,
    voice_events: mpsc::UnboundedSender<RecognitionEvent>,
    voice_task: JoinHandle<()>,
}

impl ChatApp {
    /// Build the app and spawn the voice event loop. `make_recognizer`
    /// receives the channels a recognizer reports through.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F>(config: &SimConfig, seed: Option<u64>, make_recognizer: F) -> Self
    where
        F: FnOnce(RecognizerLink) -> Box<dyn SpeechRecognizer>,
    {
        let generator = MessageGenerator::from_config(config, seed);
        let sim = ChatSim::new(config, generator).shared();

        let (voice_events, voice_rx) = mpsc::unbounded_channel();
        let link = RecognizerLink {
            surfaces: lock(&sim).sender(),
            results: voice_events.clone(),
        };
        let voice = VoiceControl::new(sim.clone(), make_recognizer(link));
        let handler = VoiceHandler::new(sim.clone(), KeywordRules::from_settings(&config.voice));
        let voice_task = tokio::spawn(handler.run(voice_rx));

        {
            let guard = lock(&sim);
            info!(
                categories = guard.categories().len(),
                emotes = guard.emotes().len(),
                "chat ready"
            );
        }

        Self {
            spam: SpamDriver::new(sim.clone()),
            sim,
            voice,
            voice_events,
            voice_task,
        }
    }

    pub fn sim(&self) -> &SharedSim {
        &self.sim
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        lock(&self.sim).subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        lock(&self.sim).snapshot()
    }

    pub fn spam_config(&self) -> SpamConfig {
        lock(&self.sim).spam().clone()
    }

    pub fn clear(&self) {
        lock(&self.sim).clear();
    }

    pub fn start_spam(&self) -> bool {
        self.spam.start()
    }

    pub fn stop_spam(&self) -> bool {
        self.spam.stop()
    }

    pub fn toggle_spam(&self) -> bool {
        self.spam.toggle()
    }

    pub fn set_category(&self, category: &str) -> Result<()> {
        lock(&self.sim).set_category(category)
    }

    pub fn set_speed(&self, speed: i64) -> Result<u64> {
        lock(&self.sim).set_speed(speed)
    }

    /// Microphone level in `[0, 1]`, mapped onto the speed slider.
    pub fn set_volume(&self, level: f64) -> Result<u64> {
        lock(&self.sim).set_volume(level)
    }

    pub fn submit_text(&self, text: &str) -> Option<ChatEntry> {
        lock(&self.sim).submit_text(text)
    }

    pub fn toggle_recording(&self) -> Result<bool> {
        self.voice.toggle()
    }

    /// Channels for an additional recognizer reporting into this app.
    pub fn recognizer_link(&self) -> RecognizerLink {
        RecognizerLink {
            surfaces: lock(&self.sim).sender(),
            results: self.voice_events.clone(),
        }
    }

    /// Feed a recognizer event (e.g. relayed from the page) into the voice loop.
    pub fn push_voice_event(&self, event: RecognitionEvent) {
        let _ = self.voice_events.send(event);
    }
}

impl Drop for ChatApp {
    fn drop(&mut self) {
        self.voice_task.abort();
    }
}
