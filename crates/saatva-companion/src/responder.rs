//! Keyword-driven reply selection.
//!
//! A message is scanned once with an Aho-Corasick automaton for the topic
//! keywords. If several topics match, the one listed first in [`TOPICS`]
//! wins. Messages with no keyword get one of the general supportive
//! replies, chosen at random.

use aho_corasick::AhoCorasick;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::debug;

use crate::error::Result;

/// A topic the companion has a dedicated reply for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Topic {
    Anxiety,
    Sadness,
    Stress,
}

/// Topics in priority order with their trigger keywords and reply.
pub const TOPICS: &[(Topic, &[&str], &str)] = &[
    (
        Topic::Anxiety,
        &["anxious", "anxiety"],
        "Anxiety can be overwhelming. Try the 4-7-8 breathing technique: breathe in for 4, \
         hold for 7, exhale for 8. This can help calm your nervous system.",
    ),
    (
        Topic::Sadness,
        &["sad", "depressed"],
        "I'm sorry you're feeling this way. Your feelings are valid. Sometimes sadness is our \
         mind's way of processing difficult experiences. What's one small thing that brought \
         you even a moment of peace recently?",
    ),
    (
        Topic::Stress,
        &["stressed", "stress"],
        "Stress can feel overwhelming, but you're taking a positive step by acknowledging it. \
         Consider breaking down your concerns into smaller, manageable pieces. What's the most \
         pressing thing on your mind right now?",
    ),
];

/// Replies used when no topic keyword matches.
pub const GENERAL_REPLIES: [&str; 6] = [
    "I understand what you're going through. It takes courage to express your feelings. \
     Can you tell me more about what's on your mind?",
    "That sounds challenging. Remember that it's okay to feel this way. What do you think \
     might help you feel a little better right now?",
    "Thank you for sharing that with me. Your feelings are valid. Have you considered trying \
     some breathing exercises or mindfulness practices?",
    "I hear you. Sometimes talking about our experiences can be really helpful. What's been \
     the most difficult part for you lately?",
    "It's wonderful that you're taking time to reflect on your mental health. What are some \
     things that usually bring you comfort or joy?",
    "I'm here to support you. Remember that seeking help is a sign of strength, not weakness. \
     What small step could you take today to care for yourself?",
];

/// Picks a reply for a user message.
pub struct Responder {
    matcher: AhoCorasick,
    /// Topic for each automaton pattern, by pattern index.
    pattern_topics: Vec<Topic>,
    rng: SystemRandom,
}

impl Responder {
    /// Compile the keyword automaton.
    pub fn new() -> Result<Self> {
        let mut patterns = Vec::new();
        let mut pattern_topics = Vec::new();
        for (topic, keywords, _) in TOPICS {
            for keyword in *keywords {
                patterns.push(*keyword);
                pattern_topics.push(*topic);
            }
        }

        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)?;
        debug!(patterns = patterns.len(), "companion keyword matcher built");

        Ok(Self {
            matcher,
            pattern_topics,
            rng: SystemRandom::new(),
        })
    }

    /// The highest-priority topic mentioned in `message`, if any.
    pub fn topic(&self, message: &str) -> Option<Topic> {
        self.matcher
            .find_overlapping_iter(message)
            .map(|m| self.pattern_topics[m.pattern().as_usize()])
            .min()
    }

    /// Choose a reply to `message`.
    pub fn reply(&self, message: &str) -> String {
        if let Some(topic) = self.topic(message) {
            debug!(?topic, "keyword reply");
            let reply = TOPICS
                .iter()
                .find(|(t, _, _)| *t == topic)
                .map(|(_, _, reply)| *reply)
                .unwrap_or(GENERAL_REPLIES[0]);
            return reply.to_string();
        }
        GENERAL_REPLIES[self.random_below(GENERAL_REPLIES.len())].to_string()
    }

    /// Uniform-enough index in `0..bound`; falls back to 0 if the system
    /// RNG is unavailable.
    pub(crate) fn random_below(&self, bound: usize) -> usize {
        let mut buf = [0u8; 8];
        if self.rng.fill(&mut buf).is_err() || bound == 0 {
            return 0;
        }
        (u64::from_le_bytes(buf) % bound as u64) as usize
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("patterns", &self.pattern_topics.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
