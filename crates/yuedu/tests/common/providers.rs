//! Deterministic `Translator` implementations.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use yuedu::jobs::{ParagraphOutline, Segment};
use yuedu::provider::{ProviderError, ProviderItem, TranslationStream, Translator};

pub type Script = Vec<Result<ProviderItem, ProviderError>>;

pub fn outline(counts: &[usize]) -> ProviderItem {
    ProviderItem::Outline(
        counts
            .iter()
            .map(|&segment_count| ParagraphOutline {
                indent: String::new(),
                separator: String::new(),
                segment_count,
            })
            .collect(),
    )
}

pub fn segment(paragraph: usize, index: usize, text: &str, pinyin: &str, english: &str) -> ProviderItem {
    ProviderItem::Segment(Segment {
        paragraph_index: paragraph,
        segment_index: index,
        text: text.to_string(),
        pinyin: pinyin.to_string(),
        english: english.to_string(),
    })
}

pub fn transient(message: &str) -> Result<ProviderItem, ProviderError> {
    Err(ProviderError::Transient(message.to_string()))
}

/// Output for the input "你好，世界。".
pub fn hello_world_script() -> Script {
    vec![
        Ok(outline(&[2])),
        Ok(segment(0, 0, "你好", "nǐ hǎo", "hello")),
        Ok(segment(0, 1, "，世界。", "shì jiè", "world")),
        Ok(ProviderItem::FullTranslation("Hello, world.".to_string())),
    ]
}

/// Replays one script per `translate` call, then fails transiently.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Translator for ScriptedProvider {
    fn translate(&self, _text: &str) -> Result<TranslationStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().unwrap().pop_front() {
            Some(script) => Ok(Box::new(script.into_iter())),
            None => Err(ProviderError::Transient("provider unavailable".to_string())),
        }
    }
}

/// Yields one script item per permit sent through the gate.
pub struct GatedProvider {
    script: Mutex<Option<Script>>,
    gate: Receiver<()>,
}

impl GatedProvider {
    pub fn new(script: Script) -> (Self, Sender<()>) {
        let (tx, rx) = unbounded();
        (
            Self {
                script: Mutex::new(Some(script)),
                gate: rx,
            },
            tx,
        )
    }
}

struct GatedStream {
    items: std::vec::IntoIter<Result<ProviderItem, ProviderError>>,
    gate: Receiver<()>,
}

impl Iterator for GatedStream {
    type Item = Result<ProviderItem, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.items.len() == 0 {
            return None;
        }
        self.gate.recv().ok()?;
        self.items.next()
    }
}

impl Translator for GatedProvider {
    fn translate(&self, _text: &str) -> Result<TranslationStream, ProviderError> {
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ProviderError::Transient("script already consumed".to_string()))?;
        Ok(Box::new(GatedStream {
            items: script.into_iter(),
            gate: self.gate.clone(),
        }))
    }
}

/// Permits `n` more items.
pub fn release(gate: &Sender<()>, n: usize) {
    for _ in 0..n {
        gate.send(()).unwrap();
    }
}
