use crate::{
    emotion,
    generator::Generator,
    prompts::Prompts,
    protocol::{Action, InboundEvent, Outbound},
    redact::redact,
    section::{Section, parse_sections},
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

/// Longest slice of a section's content, in characters, that is sent to the generator.
pub const SECTION_CONTENT_LIMIT: usize = 3000;
/// Title carried by the end marker of the introduction turn.
pub const INTRODUCTION_MARKER: &str = "introduction";
pub const NO_CONTENT_ERROR: &str = "No report loaded";

/// Where a walkthrough stands. Only ever moves forward once sections are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WalkthroughPhase {
    /// No document has produced any sections yet.
    Empty,
    /// Sections are loaded but the introduction has not been delivered.
    Introducing,
    /// Explaining `sections[cursor]` on each turn.
    Walking,
    /// Every section has been explained; the closing message is pending.
    Concluding,
    /// The closing message was delivered. Further turns repeat it.
    Done,
}

/// Limits applied to every call into the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPolicy {
    pub generation_timeout: Duration,
    /// Extra attempts for a section whose failed reply reached the caller with no text.
    pub section_retries: u32,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            section_retries: 0,
        }
    }
}

/// The outbound channel closed, so nobody is listening to this session any more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("walkthrough client disconnected")]
pub struct Disconnected;

#[derive(Debug, thiserror::Error)]
enum TurnFailure {
    #[error("{0:#}")]
    Generation(anyhow::Error),
    #[error("generation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("generator returned an empty reply")]
    EmptyReply,
    #[error(transparent)]
    Disconnected(#[from] Disconnected),
}

/// Per-connection walkthrough state.
///
/// Each inbound event is one turn: it is handled to completion, writing zero or more
/// [`Outbound`] messages, before the next event for the same connection is read.
pub struct WalkthroughSession {
    sections: Vec<Section>,
    cursor: usize,
    phase: WalkthroughPhase,
    introduced: bool,
    prompts: Arc<Prompts>,
    policy: TurnPolicy,
}

impl WalkthroughSession {
    pub fn new(prompts: Arc<Prompts>, policy: TurnPolicy) -> Self {
        Self {
            sections: Vec::new(),
            cursor: 0,
            phase: WalkthroughPhase::Empty,
            introduced: false,
            prompts,
            policy,
        }
    }

    pub fn phase(&self) -> WalkthroughPhase {
        self.phase
    }

    /// Index of the next section to explain.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn is_introduced(&self) -> bool {
        self.introduced
    }

    /// Parses `document` into sections unless sections are already loaded.
    ///
    /// Returns the number of sections the session holds afterwards. A document that
    /// parses to nothing leaves the session empty, so a later `init` may still load.
    pub fn load(&mut self, document: &str) -> usize {
        if !self.sections.is_empty() {
            tracing::debug!("Ignoring document; sections are already loaded");
            return self.sections.len();
        }

        self.sections = parse_sections(document);
        self.cursor = 0;
        self.introduced = false;
        if self.sections.is_empty() {
            tracing::warn!(
                document_len = document.len(),
                "Document produced no sections"
            );
        } else {
            self.phase = WalkthroughPhase::Introducing;
            tracing::info!(sections = self.sections.len(), "Report loaded");
        }
        self.sections.len()
    }

    /// Runs one turn for `event`, writing its messages to `outbox`.
    ///
    /// Generation failures are reported to the client and never returned; the only
    /// error is [`Disconnected`], after which the session should be dropped.
    pub async fn handle_event<G>(
        &mut self,
        event: &InboundEvent,
        generator: &G,
        outbox: &Sender<Outbound>,
    ) -> Result<(), Disconnected>
    where
        G: Generator + ?Sized,
    {
        if event.action == Action::Init {
            match event.document.as_deref() {
                Some(document) => {
                    self.load(document);
                }
                None => tracing::warn!("init event carried no document"),
            }
        }

        if self.sections.is_empty() {
            return send(outbox, Outbound::error(NO_CONTENT_ERROR)).await;
        }

        match self.phase {
            WalkthroughPhase::Empty | WalkthroughPhase::Introducing => {
                self.introduction_turn(generator, outbox).await
            }
            WalkthroughPhase::Walking => {
                self.section_turn(event.emotion_label(), generator, outbox)
                    .await
            }
            WalkthroughPhase::Concluding | WalkthroughPhase::Done => {
                self.conclusion_turn(generator, outbox).await
            }
        }
    }

    async fn introduction_turn<G>(
        &mut self,
        generator: &G,
        outbox: &Sender<Outbound>,
    ) -> Result<(), Disconnected>
    where
        G: Generator + ?Sized,
    {
        let mut delivered = 0;
        let result = self
            .relay_reply(generator, &self.prompts.introduction, outbox, &mut delivered)
            .await;
        match result {
            Ok(_) => {
                self.introduced = true;
                self.phase = WalkthroughPhase::Walking;
                send(
                    outbox,
                    Outbound::End {
                        section: INTRODUCTION_MARKER.to_string(),
                        progress: None,
                    },
                )
                .await
            }
            Err(TurnFailure::Disconnected(e)) => Err(e),
            Err(failure) => {
                tracing::error!(error = %failure, "Introduction turn failed");
                send(outbox, Outbound::error(format!("Introduction error: {failure}"))).await
            }
        }
    }

    async fn section_turn<G>(
        &mut self,
        emotion_label: &str,
        generator: &G,
        outbox: &Sender<Outbound>,
    ) -> Result<(), Disconnected>
    where
        G: Generator + ?Sized,
    {
        let section = &self.sections[self.cursor];
        let title = section.title().to_string();
        let data = redact(truncate_chars(section.content(), SECTION_CONTENT_LIMIT));
        let instruction = self.prompts.section(
            &title,
            emotion_label,
            emotion::preface(emotion_label),
            &data,
        );

        let mut attempt = 0;
        let outcome = loop {
            let mut delivered = 0;
            let result = self
                .relay_reply(generator, &instruction, outbox, &mut delivered)
                .await;
            match result {
                Ok(reply) => break Ok(reply),
                Err(TurnFailure::Disconnected(e)) => return Err(e),
                Err(failure) if delivered == 0 && attempt < self.policy.section_retries => {
                    attempt += 1;
                    tracing::warn!(
                        section = self.cursor,
                        attempt,
                        error = %failure,
                        "Retrying section"
                    );
                }
                Err(failure) => break Err(failure),
            }
        };

        // Advance even on failure so one bad section cannot wedge the walkthrough.
        self.cursor += 1;
        if self.cursor >= self.sections.len() {
            self.phase = WalkthroughPhase::Concluding;
        }

        match outcome {
            Ok(_) => {
                send(
                    outbox,
                    Outbound::End {
                        section: title,
                        progress: Some(format!("{}/{}", self.cursor, self.sections.len())),
                    },
                )
                .await
            }
            Err(failure) => {
                tracing::error!(
                    section = self.cursor - 1,
                    title = %title,
                    error = %failure,
                    "Section turn failed; skipping section"
                );
                send(outbox, Outbound::error(format!("Section error: {failure}"))).await
            }
        }
    }

    async fn conclusion_turn<G>(
        &mut self,
        generator: &G,
        outbox: &Sender<Outbound>,
    ) -> Result<(), Disconnected>
    where
        G: Generator + ?Sized,
    {
        let mut delivered = 0;
        let result = self
            .relay_reply(generator, &self.prompts.conclusion, outbox, &mut delivered)
            .await;
        match result {
            Ok(_) => {
                self.phase = WalkthroughPhase::Done;
                send(outbox, Outbound::Complete).await
            }
            Err(TurnFailure::Disconnected(e)) => Err(e),
            Err(failure) => {
                tracing::error!(error = %failure, "Conclusion turn failed");
                send(outbox, Outbound::error(format!("Conclusion error: {failure}"))).await
            }
        }
    }

    /// Streams one reply to the client as `message` frames and returns the full text.
    /// `delivered` counts the frames sent, and stays valid if the call times out.
    async fn relay_reply<G>(
        &self,
        generator: &G,
        instruction: &str,
        outbox: &Sender<Outbound>,
        delivered: &mut usize,
    ) -> Result<String, TurnFailure>
    where
        G: Generator + ?Sized,
    {
        let timeout = self.policy.generation_timeout;
        let relay = async {
            let mut fragments = generator
                .generate(instruction)
                .await
                .map_err(TurnFailure::Generation)?;

            let mut reply = String::new();
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment.map_err(TurnFailure::Generation)?;
                if fragment.is_empty() {
                    continue;
                }
                send(outbox, Outbound::message(fragment.as_str())).await?;
                *delivered += 1;
                reply.push_str(&fragment);
            }

            if reply.trim().is_empty() {
                return Err(TurnFailure::EmptyReply);
            }
            Ok::<_, TurnFailure>(reply)
        };

        tokio::time::timeout(timeout, relay)
            .await
            .unwrap_or(Err(TurnFailure::TimedOut(timeout)))
    }
}

async fn send(outbox: &Sender<Outbound>, message: Outbound) -> Result<(), Disconnected> {
    outbox.send(message).await.map_err(|_| Disconnected)
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
