//! Voice-driven category switching.
//!
//! Speech recognition is an external capability behind [`SpeechRecognizer`]:
//! something that can be started and stopped and that reports back through a
//! stream of [`RecognitionEvent`]s. [`VoiceHandler`] consumes that stream and
//! applies keyword rules to the shared chat state.
//!
//! Two recognizers ship with the crate:
//! - [`BrowserRecognizer`] relays start/stop to the page, which runs the Web
//!   Speech API and posts events back over HTTP.
//! - [`ScriptedRecognizer`] is fed transcripts directly (tests, terminal `/say`).

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{KeywordRule, VoiceSettings};
use crate::error::{Result, SimError};
use crate::state::{lock, ChatEvent, SharedSim, VOICE_LISTENING, VOICE_OFF};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerCommand {
    Start,
    Stop,
}

/// Callbacks of a continuous recognizer, delivered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Start,
    /// All result segments so far; the last one is the latest.
    Result { transcripts: Vec<String> },
    End,
    Error(String),
}

pub trait SpeechRecognizer: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Channels handed to a recognizer when the app is built.
#[derive(Debug, Clone)]
pub struct RecognizerLink {
    /// Broadcast to every connected surface.
    pub surfaces: broadcast::Sender<ChatEvent>,
    /// Feed events back into the voice handler.
    pub results: mpsc::UnboundedSender<RecognitionEvent>,
}

/// Ordered keyword rules; see [`KeywordRules::resolve`].
#[derive(Debug, Clone, Default)]
pub struct KeywordRules {
    rules: Vec<KeywordRule>,
}

impl KeywordRules {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn from_settings(settings: &VoiceSettings) -> Self {
        Self::new(settings.keywords.clone())
    }

    /// Category selected by `transcript`, if any rule matches.
    ///
    /// Rules are checked in written order with case-sensitive substring
    /// containment, and each match overrides the previous one, so the last
    /// matching rule wins regardless of where its phrase sits in the text.
    pub fn resolve(&self, transcript: &str) -> Option<&str> {
        self.rules
            .iter()
            .filter(|rule| transcript.contains(rule.phrase.as_str()))
            .last()
            .map(|rule| rule.category.as_str())
    }
}

/// Applies recognizer events to the chat state.
pub struct VoiceHandler {
    sim: SharedSim,
    rules: KeywordRules,
}

impl VoiceHandler {
    pub fn new(sim: SharedSim, rules: KeywordRules) -> Self {
        Self { sim, rules }
    }

    pub fn handle(&self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Start => {
                lock(&self.sim).set_voice(true, Some(VOICE_LISTENING));
            }
            RecognitionEvent::End => {
                lock(&self.sim).set_voice(false, Some(VOICE_OFF));
            }
            RecognitionEvent::Error(message) => {
                error!(error = %message, "speech recognition error");
            }
            RecognitionEvent::Result { transcripts } => {
                let Some(transcript) = transcripts.last() else {
                    return;
                };
                debug!(%transcript, "transcript received");
                let mut sim = lock(&self.sim);
                let recording = sim.voice().recording;
                sim.set_voice(recording, Some(transcript.as_str()));
                if let Some(category) = self.rules.resolve(transcript) {
                    if let Err(e) = sim.set_category(category) {
                        warn!(error = %e, %transcript, "voice keyword ignored");
                    }
                }
            }
        }
    }

    /// Drain events until every sender is gone.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<RecognitionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("voice event stream closed");
    }
}

/// Owns the recognizer and implements the record button.
pub struct VoiceControl {
    sim: SharedSim,
    recognizer: Mutex<Box<dyn SpeechRecognizer>>,
}

impl VoiceControl {
    pub fn new(sim: SharedSim, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        Self {
            sim,
            recognizer: Mutex::new(recognizer),
        }
    }

    /// Stop if recording, otherwise ask the recognizer to start. Returns
    /// whether recording was requested. Recording only shows as on once the
    /// recognizer reports `Start`.
    pub fn toggle(&self) -> Result<bool> {
        // hold the recognizer for the whole toggle so two toggles cannot both start it
        let mut recognizer = self
            .recognizer
            .lock()
            .map_err(|_| SimError::Recognizer("recognizer lock poisoned".to_string()))?;
        let recording = lock(&self.sim).voice().recording;
        if recording {
            recognizer.stop()?;
            lock(&self.sim).set_voice(false, None);
            info!("recording stopped");
            Ok(false)
        } else {
            recognizer.start()?;
            info!("recording requested");
            Ok(true)
        }
    }
}

/// Drives a recognizer hosted by the browser page.
pub struct BrowserRecognizer {
    surfaces: broadcast::Sender<ChatEvent>,
}

impl BrowserRecognizer {
    pub fn new(link: RecognizerLink) -> Self {
        Self {
            surfaces: link.surfaces,
        }
    }

    fn send(&self, command: RecognizerCommand) -> Result<()> {
        self.surfaces
            .send(ChatEvent::Recognizer { command })
            .map(|_| ())
            .map_err(|_| SimError::Recognizer("no page connected to host speech recognition".to_string()))
    }
}

impl SpeechRecognizer for BrowserRecognizer {
    fn start(&mut self) -> Result<()> {
        self.send(RecognizerCommand::Start)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(RecognizerCommand::Stop)
    }
}

/// In-process recognizer fed with [`ScriptedRecognizer::hear`]. Clones share
/// the listening state.
#[derive(Debug, Clone)]
pub struct ScriptedRecognizer {
    results: mpsc::UnboundedSender<RecognitionEvent>,
    listening: Arc<AtomicBool>,
    transcripts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRecognizer {
    pub fn new(link: RecognizerLink) -> Self {
        Self {
            results: link.results,
            listening: Arc::new(AtomicBool::new(false)),
            transcripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Deliver a transcript segment. Ignored (returns false) while stopped.
    pub fn hear(&self, transcript: &str) -> bool {
        if !self.is_listening() {
            return false;
        }
        let transcripts = {
            let mut segments = self
                .transcripts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            segments.push(transcript.to_string());
            segments.clone()
        };
        self.results
            .send(RecognitionEvent::Result { transcripts })
            .is_ok()
    }

    /// Report a recognizer failure.
    pub fn fail(&self, message: &str) {
        let _ = self.results.send(RecognitionEvent::Error(message.to_string()));
    }

    fn emit(&self, event: RecognitionEvent) -> Result<()> {
        self.results
            .send(event)
            .map_err(|_| SimError::Recognizer("voice handler is gone".to_string()))
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn start(&mut self) -> Result<()> {
        if !self.listening.swap(true, Ordering::SeqCst) {
            if let Ok(mut segments) = self.transcripts.lock() {
                segments.clear();
            }
            self.emit(RecognitionEvent::Start)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.emit(RecognitionEvent::End)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::generator::MessageGenerator;
    use crate::state::ChatSim;
    use rstest::rstest;

    fn rules() -> KeywordRules {
        KeywordRules::from_settings(&SimConfig::builtin().unwrap().voice)
    }

    fn shared_sim() -> SharedSim {
        let config = SimConfig::builtin().unwrap();
        ChatSim::new(&config, MessageGenerator::from_config(&config, Some(2))).shared()
    }

    fn link() -> (RecognizerLink, mpsc::UnboundedReceiver<RecognitionEvent>) {
        let (surfaces, _) = broadcast::channel(8);
        let (results, rx) = mpsc::unbounded_channel();
        (RecognizerLink { surfaces, results }, rx)
    }

    #[rstest]
    #[case("that was a banger", Some("jams"))]
    #[case("haha nice", Some("laughing"))]
    #[case("look at these weebs", Some("weebs"))]
    #[case("I love anime", Some("weebs"))]
    #[case("banger haha", Some("jams"))]
    #[case("haha what an anime banger", Some("weebs"))]
    #[case("Banger", None)]
    #[case("HAHA", None)]
    #[case("", None)]
    fn test_keyword_resolution(#[case] transcript: &str, #[case] expected: Option<&str>) {
        assert_eq!(rules().resolve(transcript), expected);
    }

    #[test]
    fn test_keyword_is_substring_not_word() {
        assert_eq!(rules().resolve("bangers only"), Some("jams"));
        assert_eq!(rules().resolve("hahaha"), Some("laughing"));
    }

    #[test]
    fn test_handler_banger_switches_to_jams() {
        let sim = shared_sim();
        let handler = VoiceHandler::new(sim.clone(), rules());
        handler.handle(RecognitionEvent::Result {
            transcripts: vec!["hello".to_string(), "this is a banger".to_string()],
        });
        let guard = lock(&sim);
        assert_eq!(guard.spam().category, "jams");
        assert_eq!(guard.voice().output, "this is a banger");
    }

    #[test]
    fn test_handler_uses_latest_segment_only() {
        let sim = shared_sim();
        let handler = VoiceHandler::new(sim.clone(), rules());
        handler.handle(RecognitionEvent::Result {
            transcripts: vec!["banger".to_string(), "nothing here".to_string()],
        });
        assert_eq!(lock(&sim).spam().category, "laughing");
    }

    #[test]
    fn test_handler_start_end_markers() {
        let sim = shared_sim();
        let handler = VoiceHandler::new(sim.clone(), rules());
        handler.handle(RecognitionEvent::Start);
        assert!(lock(&sim).voice().recording);
        assert_eq!(lock(&sim).voice().output, VOICE_LISTENING);
        handler.handle(RecognitionEvent::End);
        assert!(!lock(&sim).voice().recording);
        assert_eq!(lock(&sim).voice().output, VOICE_OFF);
    }

    #[test]
    fn test_handler_error_changes_nothing() {
        let sim = shared_sim();
        let handler = VoiceHandler::new(sim.clone(), rules());
        handler.handle(RecognitionEvent::Error("network".to_string()));
        let guard = lock(&sim);
        assert!(!guard.voice().recording);
        assert_eq!(guard.spam().category, "laughing");
    }

    #[test]
    fn test_handler_empty_result_ignored() {
        let sim = shared_sim();
        let handler = VoiceHandler::new(sim.clone(), rules());
        handler.handle(RecognitionEvent::Result { transcripts: vec![] });
        assert_eq!(lock(&sim).voice().output, VOICE_OFF);
    }

    /// Reports `Start` synchronously, like a recognizer that is already warm.
    struct InstantRecognizer {
        sim: SharedSim,
        starts: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl SpeechRecognizer for InstantRecognizer {
        fn start(&mut self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            lock(&self.sim).set_voice(true, Some(VOICE_LISTENING));
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_record_toggles_alternate() {
        let sim = shared_sim();
        let starts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let control = VoiceControl::new(
            sim.clone(),
            Box::new(InstantRecognizer {
                sim: sim.clone(),
                starts: starts.clone(),
            }),
        );
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| control.toggle().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|on| **on).count(), 4);
        assert_eq!(starts.load(Ordering::SeqCst), 4);
        assert!(!lock(&sim).voice().recording);
    }

    #[test]
    fn test_scripted_ignores_speech_while_stopped() {
        let (link, mut rx) = link();
        let recognizer = ScriptedRecognizer::new(link);
        assert!(!recognizer.hear("banger"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scripted_start_hear_stop() {
        let (link, mut rx) = link();
        let mut recognizer = ScriptedRecognizer::new(link);
        recognizer.start().unwrap();
        assert!(recognizer.hear("one"));
        assert!(recognizer.hear("two"));
        recognizer.stop().unwrap();
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::Start);
        assert_eq!(
            rx.try_recv().unwrap(),
            RecognitionEvent::Result {
                transcripts: vec!["one".to_string()]
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RecognitionEvent::Result {
                transcripts: vec!["one".to_string(), "two".to_string()]
            }
        );
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::End);
    }

    #[test]
    fn test_scripted_double_start_single_event() {
        let (link, mut rx) = link();
        let mut recognizer = ScriptedRecognizer::new(link);
        recognizer.start().unwrap();
        recognizer.start().unwrap();
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::Start);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_browser_recognizer_without_page_errors() {
        let (link, _rx) = link();
        let mut recognizer = BrowserRecognizer::new(link);
        assert!(matches!(recognizer.start(), Err(SimError::Recognizer(_))));
    }

    #[test]
    fn test_browser_recognizer_relays_command() {
        let (link, _rx) = link();
        let mut page = link.surfaces.subscribe();
        let mut recognizer = BrowserRecognizer::new(link);
        recognizer.start().unwrap();
        assert!(matches!(
            page.try_recv(),
            Ok(ChatEvent::Recognizer {
                command: RecognizerCommand::Start
            })
        ));
    }

    #[test]
    fn test_voice_control_toggle_stops_when_recording() {
        let sim = shared_sim();
        let (link, mut rx) = link();
        let recognizer = ScriptedRecognizer::new(link);
        let control = VoiceControl::new(sim.clone(), Box::new(recognizer.clone()));
        assert!(control.toggle().unwrap());
        assert!(recognizer.is_listening());
        // the handler would normally turn this on after `Start`
        lock(&sim).set_voice(true, Some(VOICE_LISTENING));
        assert!(!control.toggle().unwrap());
        assert!(!recognizer.is_listening());
        assert!(!lock(&sim).voice().recording);
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::Start);
        assert_eq!(rx.try_recv().unwrap(), RecognitionEvent::End);
    }
}
