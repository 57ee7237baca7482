//! Bounded media buffering between capture and transmission.
//!
//! Two independent queues (audio, image) with drop-oldest eviction that
//! never blocks producers, coalesced on independent periodic flushes:
//! audio is concatenated in arrival order, images collapse to the
//! newest frame. Oversized payloads are dropped with a warning instead
//! of being sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::{ClientEvent, MediaChunk, RealtimeInput};
use crate::stats::StreamStats;

/// Raw captured audio. Freed once flushed.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub voice_active: bool,
}

/// One captured image frame. Only the newest frame between flushes
/// survives; superseded frames are discarded, not queued.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub captured_at: DateTime<Utc>,
    pub source: String,
}

/// Optional collaborator that tags audio chunks with voice activity.
/// The engine only stores the flag; downstream consumers decide what to
/// do with it.
pub trait VoiceActivityClassifier: Send + Sync {
    fn is_speech(&self, pcm: &[u8]) -> bool;
}

/// Default classifier: treats every chunk as speech.
pub struct NoopVoiceActivity;

impl VoiceActivityClassifier for NoopVoiceActivity {
    fn is_speech(&self, _pcm: &[u8]) -> bool {
        true
    }
}

/// Fixed-capacity FIFO. `push` evicts the oldest entry instead of
/// blocking or failing.
struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an item, returning the evicted oldest entry if the queue
    /// was full.
    fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Remove everything, returning the newest entry and the number of
    /// entries discarded in its favor.
    fn take_latest(&mut self) -> (Option<T>, usize) {
        let discarded = self.items.len().saturating_sub(1);
        let latest = self.items.drain(..).last();
        (latest, discarded)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Clone)]
pub struct MultimodalBufferConfig {
    pub audio_capacity: usize,
    pub image_capacity: usize,
    pub audio_flush_interval: Duration,
    pub image_flush_interval: Duration,
    /// Payloads larger than this are dropped with a warning.
    pub max_payload_bytes: usize,
    pub audio_mime_type: String,
}

impl Default for MultimodalBufferConfig {
    fn default() -> Self {
        Self {
            audio_capacity: 64,
            image_capacity: 8,
            audio_flush_interval: Duration::from_millis(500),
            image_flush_interval: Duration::from_secs(2),
            max_payload_bytes: 1024 * 1024,
            audio_mime_type: "audio/pcm;rate=16000".to_string(),
        }
    }
}

/// Accumulates captured media and coalesces it into outbound payloads.
///
/// Locks are held only for the queue mutation itself; encoding and
/// transmission happen outside them.
pub struct MultimodalBuffer {
    audio: Mutex<BoundedQueue<AudioChunk>>,
    image: Mutex<BoundedQueue<ImageFrame>>,
    config: MultimodalBufferConfig,
    vad: Box<dyn VoiceActivityClassifier>,
    stats: Arc<StreamStats>,
}

impl MultimodalBuffer {
    pub fn new(config: MultimodalBufferConfig, stats: Arc<StreamStats>) -> Self {
        Self {
            audio: Mutex::new(BoundedQueue::new(config.audio_capacity)),
            image: Mutex::new(BoundedQueue::new(config.image_capacity)),
            config,
            vad: Box::new(NoopVoiceActivity),
            stats,
        }
    }

    pub fn with_voice_activity(mut self, vad: Box<dyn VoiceActivityClassifier>) -> Self {
        self.vad = vad;
        self
    }

    /// Queue one captured audio chunk. Never blocks; evicts the oldest
    /// chunk when full.
    pub fn push_audio(&self, data: Vec<u8>) {
        let chunk = AudioChunk {
            voice_active: self.vad.is_speech(&data),
            data,
            captured_at: Utc::now(),
        };
        let evicted = {
            let mut queue = self.audio.lock().expect("audio queue poisoned");
            queue.push(chunk)
        };
        if let Some(old) = evicted {
            self.stats.incr(&self.stats.chunks_evicted);
            warn!(
                bytes = old.data.len(),
                "audio queue full, evicted oldest chunk"
            );
        }
    }

    /// Queue one captured image frame.
    pub fn push_frame(&self, data: Vec<u8>, mime_type: impl Into<String>, source: impl Into<String>) {
        let frame = ImageFrame {
            data,
            mime_type: mime_type.into(),
            captured_at: Utc::now(),
            source: source.into(),
        };
        let evicted = {
            let mut queue = self.image.lock().expect("image queue poisoned");
            queue.push(frame)
        };
        if let Some(old) = evicted {
            self.stats.incr(&self.stats.frames_superseded);
            trace!(source = %old.source, "image queue full, evicted oldest frame");
        }
    }

    /// Concatenate all buffered audio in arrival order into one
    /// payload, clearing the queue. Empty queue yields `None`.
    pub fn flush_audio(&self) -> Option<ClientEvent> {
        let chunks = {
            let mut queue = self.audio.lock().expect("audio queue poisoned");
            queue.drain()
        };
        if chunks.is_empty() {
            return None;
        }

        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        if total > self.config.max_payload_bytes {
            self.stats.incr(&self.stats.payloads_dropped);
            warn!(
                bytes = total,
                ceiling = self.config.max_payload_bytes,
                "audio payload exceeds ceiling, dropping"
            );
            return None;
        }

        let mut pcm = Vec::with_capacity(total);
        for chunk in &chunks {
            pcm.extend_from_slice(&chunk.data);
        }

        self.stats.incr(&self.stats.audio_flushes);
        self.stats.add(&self.stats.audio_bytes_out, total as u64);
        debug!(chunks = chunks.len(), bytes = total, "flushing audio");

        Some(ClientEvent::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                data: base64::engine::general_purpose::STANDARD.encode(&pcm),
                mime_type: self.config.audio_mime_type.clone(),
            }],
        }))
    }

    /// Send only the most recently buffered frame, discarding the
    /// rest. Staleness is worse than loss for image context.
    pub fn flush_image(&self) -> Option<ClientEvent> {
        let (latest, discarded) = {
            let mut queue = self.image.lock().expect("image queue poisoned");
            queue.take_latest()
        };
        if discarded > 0 {
            self.stats
                .add(&self.stats.frames_superseded, discarded as u64);
            trace!(discarded, "superseded frames discarded at flush");
        }
        let frame = latest?;

        if frame.data.len() > self.config.max_payload_bytes {
            self.stats.incr(&self.stats.payloads_dropped);
            warn!(
                bytes = frame.data.len(),
                ceiling = self.config.max_payload_bytes,
                "image payload exceeds ceiling, dropping"
            );
            return None;
        }

        self.stats.incr(&self.stats.image_flushes);
        debug!(bytes = frame.data.len(), source = %frame.source, "flushing image");

        Some(ClientEvent::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                data: base64::engine::general_purpose::STANDARD.encode(&frame.data),
                mime_type: frame.mime_type,
            }],
        }))
    }

    pub fn audio_len(&self) -> usize {
        self.audio.lock().expect("audio queue poisoned").len()
    }

    pub fn image_len(&self) -> usize {
        self.image.lock().expect("image queue poisoned").len()
    }

    pub fn config(&self) -> &MultimodalBufferConfig {
        &self.config
    }
}

/// Spawn the two periodic flush tasks. Payloads go to `outbound`; both
/// tasks stop on cancellation or when the channel closes.
pub fn spawn_flush_tasks(
    buffer: Arc<MultimodalBuffer>,
    outbound: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let audio_task = {
        let buffer = Arc::clone(&buffer);
        let outbound = outbound.clone();
        let cancel = cancel.clone();
        let period = buffer.config.audio_flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(event) = buffer.flush_audio() {
                            if outbound.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            trace!("audio flush task stopped");
        })
    };

    let image_task = {
        let cancel = cancel.clone();
        let period = buffer.config.image_flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(event) = buffer.flush_image() {
                            if outbound.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            trace!("image flush task stopped");
        })
    };

    (audio_task, image_task)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(config: MultimodalBufferConfig) -> MultimodalBuffer {
        MultimodalBuffer::new(config, Arc::new(StreamStats::new()))
    }

    fn decode_single_chunk(event: &ClientEvent) -> Vec<u8> {
        match event {
            ClientEvent::RealtimeInput(input) => {
                assert_eq!(input.media_chunks.len(), 1);
                base64::engine::general_purpose::STANDARD
                    .decode(&input.media_chunks[0].data)
                    .unwrap()
            }
            other => panic!("expected realtime input, got {other:?}"),
        }
    }

    #[test]
    fn audio_flush_concatenates_in_arrival_order() {
        let buffer = buffer_with(MultimodalBufferConfig::default());
        buffer.push_audio(vec![1; 100]);
        buffer.push_audio(vec![2; 200]);
        buffer.push_audio(vec![3; 50]);

        let event = buffer.flush_audio().expect("payload");
        let pcm = decode_single_chunk(&event);

        assert_eq!(pcm.len(), 350);
        assert!(pcm[..100].iter().all(|&b| b == 1));
        assert!(pcm[100..300].iter().all(|&b| b == 2));
        assert!(pcm[300..].iter().all(|&b| b == 3));
        assert_eq!(buffer.audio_len(), 0);
    }

    #[test]
    fn empty_audio_flush_is_noop() {
        let buffer = buffer_with(MultimodalBufferConfig::default());
        assert!(buffer.flush_audio().is_none());
        assert_eq!(buffer.stats.snapshot().audio_flushes, 0);
    }

    #[test]
    fn audio_queue_evicts_oldest_when_full() {
        let config = MultimodalBufferConfig {
            audio_capacity: 2,
            ..Default::default()
        };
        let buffer = buffer_with(config);
        buffer.push_audio(vec![1]);
        buffer.push_audio(vec![2]);
        buffer.push_audio(vec![3]); // evicts [1]

        let event = buffer.flush_audio().expect("payload");
        let pcm = decode_single_chunk(&event);
        assert_eq!(pcm, vec![2, 3]);
        assert_eq!(buffer.stats.snapshot().chunks_evicted, 1);
    }

    #[test]
    fn image_flush_keeps_only_newest_frame() {
        let buffer = buffer_with(MultimodalBufferConfig::default());
        buffer.push_frame(vec![1], "image/jpeg", "camera");
        buffer.push_frame(vec![2], "image/jpeg", "camera");
        buffer.push_frame(vec![3, 3], "image/png", "screen");

        let event = buffer.flush_image().expect("payload");
        match &event {
            ClientEvent::RealtimeInput(input) => {
                assert_eq!(input.media_chunks[0].mime_type, "image/png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decode_single_chunk(&event), vec![3, 3]);
        assert_eq!(buffer.image_len(), 0);
        assert_eq!(buffer.stats.snapshot().frames_superseded, 2);
    }

    #[test]
    fn empty_image_flush_is_noop() {
        let buffer = buffer_with(MultimodalBufferConfig::default());
        assert!(buffer.flush_image().is_none());
    }

    #[test]
    fn oversized_audio_payload_is_dropped() {
        let config = MultimodalBufferConfig {
            max_payload_bytes: 10,
            ..Default::default()
        };
        let buffer = buffer_with(config);
        buffer.push_audio(vec![0; 11]);

        assert!(buffer.flush_audio().is_none());
        assert_eq!(buffer.audio_len(), 0);
        assert_eq!(buffer.stats.snapshot().payloads_dropped, 1);
    }

    #[test]
    fn oversized_image_payload_is_dropped() {
        let config = MultimodalBufferConfig {
            max_payload_bytes: 4,
            ..Default::default()
        };
        let buffer = buffer_with(config);
        buffer.push_frame(vec![0; 5], "image/jpeg", "camera");

        assert!(buffer.flush_image().is_none());
        assert_eq!(buffer.stats.snapshot().payloads_dropped, 1);
    }

    #[test]
    fn voice_activity_tag_is_recorded() {
        struct Silent;
        impl VoiceActivityClassifier for Silent {
            fn is_speech(&self, _pcm: &[u8]) -> bool {
                false
            }
        }

        let buffer = buffer_with(MultimodalBufferConfig::default())
            .with_voice_activity(Box::new(Silent));
        buffer.push_audio(vec![1, 2]);

        let chunks = buffer.audio.lock().unwrap().drain();
        assert!(!chunks[0].voice_active);
    }

    #[tokio::test]
    async fn flush_tasks_deliver_payloads_on_ticks() {
        let buffer = Arc::new(buffer_with(MultimodalBufferConfig {
            audio_flush_interval: Duration::from_millis(20),
            image_flush_interval: Duration::from_secs(60),
            ..Default::default()
        }));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let (audio_task, image_task) = spawn_flush_tasks(Arc::clone(&buffer), tx, cancel.clone());

        buffer.push_audio(vec![7; 20]);

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("flush tick")
            .expect("flushed payload");
        assert_eq!(decode_single_chunk(&event), vec![7; 20]);

        cancel.cancel();
        audio_task.await.unwrap();
        image_task.await.unwrap();
    }
}
