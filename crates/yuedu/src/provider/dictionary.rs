//! Offline provider backed by a CC-CEDICT dictionary file.
//!
//! Segmentation is greedy longest match over dictionary words. Characters
//! that are neither dictionary words nor CJK ideographs (punctuation,
//! spaces, latin text) are attached to the following word, or to the
//! previous one at the end of a paragraph, so every character of the
//! paragraph lands in exactly one segment.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::pinyin::numbered_to_tone_marks;
use super::text::{is_cjk_ideograph, should_skip_segment, split_paragraphs};
use super::{ParagraphOutline, ProviderError, ProviderItem, SegmentOutput, TranslationStream, Translator};

static RE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(\S+)\s+\[([^\]]+)\]\s+/(.+)/$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictEntry {
    pub pinyin: String,
    pub pinyin_numbered: String,
    pub senses: Vec<String>,
}

impl DictEntry {
    pub fn first_sense(&self) -> &str {
        self.senses.first().map(String::as_str).unwrap_or("")
    }
}

/// Simplified headword → entries, in file order.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: HashMap<String, Vec<DictEntry>>,
    longest_word: usize,
}

impl Dictionary {
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        let file = std::fs::File::open(path).map_err(|source| ProviderError::Dictionary {
            path: path.to_path_buf(),
            source,
        })?;
        let dict = Self::from_reader(std::io::BufReader::new(file)).map_err(|source| {
            ProviderError::Dictionary {
                path: path.to_path_buf(),
                source,
            }
        })?;
        log::info!(
            "Loaded {} dictionary headwords from {}",
            dict.len(),
            path.display()
        );
        Ok(dict)
    }

    /// Parses CEDICT lines, skipping comments and lines that do not match.
    pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut dict = Self::default();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            let Some(caps) = RE_ENTRY.captures(line) else {
                continue;
            };
            let senses: Vec<String> = caps[4]
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if senses.is_empty() {
                continue;
            }
            let numbered = caps[3].trim().to_string();
            dict.insert(
                &caps[2],
                DictEntry {
                    pinyin: numbered_to_tone_marks(&numbered),
                    pinyin_numbered: numbered,
                    senses,
                },
            );
        }
        Ok(dict)
    }

    pub fn insert(&mut self, word: &str, entry: DictEntry) {
        self.longest_word = self.longest_word.max(word.chars().count());
        self.entries.entry(word.to_string()).or_default().push(entry);
    }

    pub fn lookup(&self, word: &str) -> Option<&DictEntry> {
        self.entries.get(word).and_then(|entries| entries.first())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest dictionary word starting at `chars[start]`, in characters.
    fn longest_match(&self, chars: &[char], start: usize) -> Option<usize> {
        let max = self.longest_word.min(chars.len() - start);
        (1..=max).rev().find(|&len| {
            let word: String = chars[start..start + len].iter().collect();
            self.entries.contains_key(&word)
        })
    }
}

/// One segment and the dictionary word inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Piece {
    text: String,
    word: Option<String>,
}

#[derive(Clone)]
pub struct DictionaryTranslator {
    dict: Arc<Dictionary>,
}

impl DictionaryTranslator {
    pub fn new(dict: Dictionary) -> Self {
        Self {
            dict: Arc::new(dict),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ProviderError> {
        Ok(Self::new(Dictionary::load(path)?))
    }

    fn segment(&self, content: &str) -> Vec<Piece> {
        let chars: Vec<char> = content.chars().collect();
        let mut pieces: Vec<Piece> = Vec::new();
        let mut carry = String::new();
        let mut i = 0;

        while i < chars.len() {
            if let Some(len) = self.dict.longest_match(&chars, i) {
                let word: String = chars[i..i + len].iter().collect();
                let mut text = std::mem::take(&mut carry);
                text.push_str(&word);
                pieces.push(Piece {
                    text,
                    word: Some(word),
                });
                i += len;
            } else if is_cjk_ideograph(chars[i]) {
                let mut text = std::mem::take(&mut carry);
                text.push(chars[i]);
                pieces.push(Piece { text, word: None });
                i += 1;
            } else {
                carry.push(chars[i]);
                i += 1;
            }
        }

        if !carry.is_empty() {
            match pieces.last_mut() {
                Some(last) => last.text.push_str(&carry),
                None => pieces.push(Piece {
                    text: carry,
                    word: None,
                }),
            }
        }
        pieces
    }

    fn gloss(&self, piece: &Piece) -> (String, String) {
        if should_skip_segment(&piece.text) {
            return (String::new(), String::new());
        }
        match piece.word.as_deref().and_then(|w| self.dict.lookup(w)) {
            Some(entry) => (entry.pinyin.clone(), entry.first_sense().to_string()),
            None => (String::new(), String::new()),
        }
    }
}

/// Emits the outline, then segments glossed on demand, then the
/// space-joined glosses as the full translation.
struct DictionaryStream {
    translator: DictionaryTranslator,
    outline: Option<Vec<ParagraphOutline>>,
    pending: std::vec::IntoIter<(usize, usize, Piece)>,
    glosses: Vec<String>,
    finished: bool,
}

impl Iterator for DictionaryStream {
    type Item = Result<ProviderItem, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(outline) = self.outline.take() {
            return Some(Ok(ProviderItem::Outline(outline)));
        }
        if let Some((paragraph_index, segment_index, piece)) = self.pending.next() {
            let (pinyin, english) = self.translator.gloss(&piece);
            if !english.is_empty() {
                self.glosses.push(english.clone());
            }
            return Some(Ok(ProviderItem::Segment(SegmentOutput {
                paragraph_index,
                segment_index,
                text: piece.text,
                pinyin,
                english,
            })));
        }
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(Ok(ProviderItem::FullTranslation(self.glosses.join(" "))))
    }
}

impl Translator for DictionaryTranslator {
    fn translate(&self, text: &str) -> Result<TranslationStream, ProviderError> {
        let mut outline = Vec::new();
        let mut pending = Vec::new();
        for (paragraph_index, paragraph) in split_paragraphs(text).into_iter().enumerate() {
            let pieces = self.segment(paragraph.content);
            outline.push(ParagraphOutline {
                indent: paragraph.indent,
                separator: paragraph.separator.to_string(),
                segment_count: pieces.len(),
            });
            pending.extend(
                pieces
                    .into_iter()
                    .enumerate()
                    .map(|(segment_index, piece)| (paragraph_index, segment_index, piece)),
            );
        }

        Ok(Box::new(DictionaryStream {
            translator: self.clone(),
            outline: Some(outline),
            pending: pending.into_iter(),
            glosses: Vec::new(),
            finished: false,
        }))
    }
}
