//! Background emotion observer.
//!
//! The observer consumes the participant's audio and transcripts, scores
//! them through an [`EmotionModel`], and publishes one [`EmotionSnapshot`]
//! per utterance on a watch channel.
//!
//! Audio frames are appended to a FIFO guarded by an async mutex, together
//! with utterance start / end markers, and a [`Notify`] signals that data
//! is available. A single task drains the FIFO: while the participant is
//! speaking it submits segments of at least the byte threshold; after the
//! end marker it submits whatever is left, then scores the utterance's
//! passage and fuses both modalities.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::accumulator::{EmotionAccumulator, fuse, summarize_top};
use super::client::EmotionModel;
use super::{EmotionScore, EmotionSnapshot};
use crate::config::EmotionConfig;

// ---------------------------------------------------------------------------
// Shared buffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum BufferEntry {
    Start(u64),
    Audio(Vec<u8>),
    End(u64),
}

#[derive(Debug, Default)]
struct AudioBuffer {
    entries: VecDeque<BufferEntry>,
    capturing: bool,
    utterance: u64,
}

#[derive(Debug, PartialEq)]
enum Step {
    Start(u64),
    Segment(Vec<u8>),
    End(u64),
}

/// Pop the next unit of work, or `None` if more audio is needed.
///
/// Audio is released once at least `threshold` bytes are queued, or once a
/// marker bounds the run (speech ended), in which case the remainder may be
/// shorter than the threshold.
fn next_step(entries: &mut VecDeque<BufferEntry>, threshold: usize) -> Option<Step> {
    match entries.front()? {
        BufferEntry::Start(id) => {
            let id = *id;
            entries.pop_front();
            return Some(Step::Start(id));
        }
        BufferEntry::End(id) => {
            let id = *id;
            entries.pop_front();
            return Some(Step::End(id));
        }
        BufferEntry::Audio(_) => {}
    }

    let mut available = 0;
    let mut bounded = false;
    for entry in entries.iter() {
        match entry {
            BufferEntry::Audio(chunk) => available += chunk.len(),
            _ => {
                bounded = true;
                break;
            }
        }
    }
    if available < threshold && !bounded {
        return None;
    }

    let mut segment = Vec::with_capacity(available.min(threshold.max(1) * 2));
    while segment.len() < threshold.max(1) {
        match entries.front() {
            Some(BufferEntry::Audio(_)) => {
                if let Some(BufferEntry::Audio(chunk)) = entries.pop_front() {
                    segment.extend_from_slice(&chunk);
                }
            }
            _ => break,
        }
    }

    // Keep segments sample-aligned: an odd trailing byte starts the next
    // segment, or is dropped as half a sample at the end of the utterance.
    if segment.len() % 2 == 1
        && let Some(last) = segment.pop()
    {
        match entries.front_mut() {
            Some(BufferEntry::Audio(next)) => next.insert(0, last),
            Some(_) => {}
            None => entries.push_front(BufferEntry::Audio(vec![last])),
        }
        if segment.is_empty() {
            return match entries.front() {
                Some(BufferEntry::Start(_) | BufferEntry::End(_)) => next_step(entries, threshold),
                _ => None,
            };
        }
    }
    Some(Step::Segment(segment))
}

struct Shared {
    buffer: Mutex<AudioBuffer>,
    data_available: Notify,
    bot_speaking: AtomicBool,
    snapshots: watch::Sender<EmotionSnapshot>,
}

#[derive(Debug)]
struct Transcript {
    utterance: u64,
    text: String,
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Entry point: spawns the observer task.
pub struct EmotionObserver;

impl EmotionObserver {
    /// Spawn the observer task for one session.
    pub fn spawn(model: Box<dyn EmotionModel>, config: &EmotionConfig) -> EmotionObserverHandle {
        let (snapshots, _) = watch::channel(EmotionSnapshot::default());
        let shared = Arc::new(Shared {
            buffer: Mutex::new(AudioBuffer::default()),
            data_available: Notify::new(),
            bot_speaking: AtomicBool::new(false),
            snapshots,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = ObserverTask {
            shared: Arc::clone(&shared),
            model,
            transcripts: rx,
            cancel: cancel.clone(),
            accumulator: EmotionAccumulator::new(config.alpha),
            threshold: config.buffer_threshold_bytes(),
            poll: config.buffer_poll(),
            modality_wait: config.modality_wait(),
            penalty: config.single_source_penalty,
            top_n: config.summary_top_n,
            current: Utterance::new(0),
            early: Vec::new(),
        };
        let join = tokio::spawn(task.run());

        EmotionObserverHandle {
            shared,
            transcripts: tx,
            cancel: cancel.clone(),
            task: Arc::new(Mutex::new(Some(join))),
            _guard: Arc::new(cancel.drop_guard()),
        }
    }
}

/// Cloneable input side of a running observer.
#[derive(Clone)]
pub struct EmotionObserverHandle {
    shared: Arc<Shared>,
    transcripts: mpsc::UnboundedSender<Transcript>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    _guard: Arc<DropGuard>,
}

impl EmotionObserverHandle {
    /// Participant started an utterance. Ignored while the bot is speaking.
    pub async fn user_started_speaking(&self) {
        if self.shared.bot_speaking.load(Ordering::Acquire) {
            tracing::debug!("ignoring user speech start while bot is speaking");
            return;
        }
        let id = {
            let mut buf = self.shared.buffer.lock().await;
            if buf.capturing {
                return;
            }
            buf.capturing = true;
            buf.utterance += 1;
            let id = buf.utterance;
            buf.entries.push_back(BufferEntry::Start(id));
            id
        };
        // Visible before any audio of the new utterance is scored.
        self.shared.snapshots.send_replace(EmotionSnapshot::started(id));
        self.shared.data_available.notify_one();
        tracing::debug!(utterance = id, "utterance started");
    }

    /// Participant finished the current utterance.
    pub async fn user_stopped_speaking(&self) {
        {
            let mut buf = self.shared.buffer.lock().await;
            if !buf.capturing {
                return;
            }
            buf.capturing = false;
            let id = buf.utterance;
            buf.entries.push_back(BufferEntry::End(id));
        }
        self.shared.data_available.notify_one();
    }

    /// Append raw 16-bit mono PCM. Dropped unless an utterance is open.
    pub async fn push_audio(&self, pcm: Vec<u8>) {
        if pcm.is_empty() {
            return;
        }
        {
            let mut buf = self.shared.buffer.lock().await;
            if !buf.capturing {
                return;
            }
            buf.entries.push_back(BufferEntry::Audio(pcm));
        }
        self.shared.data_available.notify_one();
    }

    /// Queue a transcript fragment of the latest utterance.
    pub async fn push_transcript(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        let utterance = self.shared.buffer.lock().await.utterance;
        if self
            .transcripts
            .send(Transcript { utterance, text })
            .is_err()
        {
            tracing::debug!("emotion observer stopped; transcript dropped");
        }
    }

    pub fn bot_started_speaking(&self) {
        self.shared.bot_speaking.store(true, Ordering::Release);
    }

    pub fn bot_stopped_speaking(&self) {
        self.shared.bot_speaking.store(false, Ordering::Release);
    }

    /// A gate over this observer's snapshots.
    pub fn gate(&self) -> EmotionGate {
        EmotionGate::new(self.shared.snapshots.subscribe())
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> EmotionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Stop the task, close model connections and discard queued input.
    /// The last snapshot stays readable. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let join = self.task.lock().await.take();
        if let Some(join) = join
            && let Err(e) = join.await
        {
            tracing::error!(error = %e, "emotion observer task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Result of waiting for an utterance to be fully processed.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub snapshot: EmotionSnapshot,
    /// The cap expired before fusion completed.
    pub timed_out: bool,
}

/// Read side of the observer: lets the flow wait, with a cap, until the
/// current utterance's emotions are fully processed.
#[derive(Debug, Clone)]
pub struct EmotionGate {
    rx: watch::Receiver<EmotionSnapshot>,
}

impl EmotionGate {
    pub fn new(rx: watch::Receiver<EmotionSnapshot>) -> Self {
        Self { rx }
    }

    /// A gate that is always open with an empty snapshot, for sessions
    /// running without emotion inference.
    pub fn ready() -> Self {
        let (tx, rx) = watch::channel(EmotionSnapshot::ready_empty());
        drop(tx);
        Self { rx }
    }

    pub fn latest(&self) -> EmotionSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until the latest snapshot is fully processed or `cap` elapses.
    /// Never fails: on timeout or a stopped observer the latest snapshot is
    /// returned as-is.
    pub async fn wait_fully_processed(&mut self, cap: Duration) -> GateOutcome {
        let current = self.latest();
        if current.fully_processed {
            return GateOutcome {
                snapshot: current,
                timed_out: false,
            };
        }

        let waited = tokio::time::timeout(cap, self.rx.wait_for(|s| s.fully_processed))
            .await
            .map(|r| r.map(|snapshot| snapshot.clone()));

        match waited {
            Ok(Ok(snapshot)) => GateOutcome {
                snapshot,
                timed_out: false,
            },
            Ok(Err(_)) => {
                let snapshot = self.latest();
                tracing::warn!("emotion observer gone before fusion completed");
                GateOutcome {
                    timed_out: !snapshot.fully_processed,
                    snapshot,
                }
            }
            Err(_) => {
                tracing::warn!(cap = ?cap, "emotion wait cap expired; proceeding");
                GateOutcome {
                    snapshot: self.latest(),
                    timed_out: true,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Utterance {
    id: u64,
    ended: bool,
    passage: String,
    prosody: Option<Vec<EmotionScore>>,
    language: Option<Vec<EmotionScore>>,
    deadline: Option<Instant>,
    dirty: bool,
}

impl Utterance {
    fn new(id: u64) -> Self {
        Self {
            id,
            ended: false,
            passage: String::new(),
            prosody: None,
            language: None,
            deadline: None,
            dirty: false,
        }
    }

    fn append(&mut self, text: &str) {
        if !self.passage.is_empty() {
            self.passage.push(' ');
        }
        self.passage.push_str(text.trim());
    }
}

struct ObserverTask {
    shared: Arc<Shared>,
    model: Box<dyn EmotionModel>,
    transcripts: mpsc::UnboundedReceiver<Transcript>,
    cancel: CancellationToken,
    accumulator: EmotionAccumulator,
    threshold: usize,
    poll: Duration,
    modality_wait: Duration,
    penalty: f32,
    top_n: usize,
    current: Utterance,
    /// Transcripts tagged with an utterance whose start marker has not been
    /// drained yet.
    early: Vec<Transcript>,
}

/// Run `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

impl ObserverTask {
    async fn run(mut self) {
        tracing::debug!("emotion observer started");
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(transcript) = self.transcripts.recv() => {
                    self.on_transcript(transcript).await;
                }
                () = self.shared.data_available.notified() => {}
                () = tokio::time::sleep(self.poll) => {}
            }
            self.drain_buffer().await;
            self.maybe_fuse();
        }
        self.shutdown().await;
    }

    async fn drain_buffer(&mut self) {
        while !self.cancel.is_cancelled() {
            let step = {
                let mut buf = self.shared.buffer.lock().await;
                next_step(&mut buf.entries, self.threshold)
            };
            match step {
                None => return,
                Some(Step::Start(id)) => self.begin_utterance(id),
                Some(Step::Segment(pcm)) => self.score_segment(pcm).await,
                Some(Step::End(id)) => self.end_utterance(id).await,
            }
        }
    }

    fn begin_utterance(&mut self, id: u64) {
        self.accumulator.reset();
        self.current = Utterance::new(id);
        let early = std::mem::take(&mut self.early);
        for transcript in early {
            if transcript.utterance == id {
                self.current.append(&transcript.text);
            } else if transcript.utterance > id {
                self.early.push(transcript);
            }
        }
    }

    async fn score_segment(&mut self, pcm: Vec<u8>) {
        let bytes = pcm.len();
        let Some(result) =
            until_cancelled(&self.cancel, self.model.submit_audio_segment(&pcm)).await
        else {
            return;
        };
        match result {
            Ok(batches) => {
                for batch in &batches {
                    self.accumulator.fold(batch);
                }
                tracing::debug!(
                    utterance = self.current.id,
                    bytes,
                    predictions = batches.len(),
                    "prosody segment scored"
                );
                let id = self.current.id;
                let prosody = self.accumulator.snapshot();
                self.shared.snapshots.send_if_modified(|s| {
                    if s.utterance == id && !s.fully_processed {
                        s.prosody = prosody;
                        true
                    } else {
                        false
                    }
                });
            }
            Err(e) => {
                tracing::warn!(
                    utterance = self.current.id,
                    bytes,
                    error = %e,
                    "skipping prosody segment"
                );
            }
        }
    }

    async fn end_utterance(&mut self, id: u64) {
        if id != self.current.id {
            return;
        }
        self.current.ended = true;
        self.current.prosody = Some(self.accumulator.snapshot());
        self.current.deadline = Some(Instant::now() + self.modality_wait);
        self.current.dirty = true;
        if !self.current.passage.is_empty() {
            self.score_passage().await;
        }
    }

    async fn on_transcript(&mut self, transcript: Transcript) {
        if transcript.utterance < self.current.id {
            tracing::debug!(utterance = transcript.utterance, "dropping stale transcript");
            return;
        }
        if transcript.utterance > self.current.id {
            self.early.push(transcript);
            return;
        }
        self.current.append(&transcript.text);
        if self.current.ended {
            self.score_passage().await;
        }
    }

    async fn score_passage(&mut self) {
        let passage = self.current.passage.clone();
        let Some(result) = until_cancelled(&self.cancel, self.model.submit_text(&passage)).await
        else {
            return;
        };
        match result {
            Ok(scores) => {
                tracing::debug!(
                    utterance = self.current.id,
                    labels = scores.len(),
                    "language passage scored"
                );
                self.current.language = Some(scores);
                self.current.dirty = true;
            }
            Err(e) => {
                tracing::warn!(utterance = self.current.id, error = %e, "language scoring failed");
            }
        }
    }

    fn maybe_fuse(&mut self) {
        let cur = &mut self.current;
        if !cur.ended || !cur.dirty {
            return;
        }
        let partial = cur.language.is_none();
        if partial && cur.deadline.is_some_and(|d| Instant::now() < d) {
            return;
        }
        cur.dirty = false;

        let prosody = cur.prosody.clone().unwrap_or_default();
        let language = cur.language.clone().unwrap_or_default();
        let combined = fuse(&prosody, &language, self.penalty);
        let summary = summarize_top(&combined, self.top_n);
        let id = cur.id;

        tracing::info!(utterance = id, summary = %summary, partial, "emotions fused");

        self.shared.snapshots.send_if_modified(|s| {
            if s.utterance != id {
                return false;
            }
            *s = EmotionSnapshot {
                utterance: id,
                prosody,
                language,
                combined: Some(combined),
                summary,
                fully_processed: true,
                partial,
            };
            true
        });
    }

    async fn shutdown(mut self) {
        self.model.close().await;
        {
            let mut buf = self.shared.buffer.lock().await;
            buf.entries.clear();
            buf.capturing = false;
        }
        self.transcripts.close();
        let mut discarded = 0usize;
        while self.transcripts.try_recv().is_ok() {
            discarded += 1;
        }
        tracing::debug!(discarded, "emotion observer stopped");
    }
}
