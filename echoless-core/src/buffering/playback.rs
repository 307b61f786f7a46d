//! FIFO of chunks waiting to be played, with a read cursor into the current one.

use std::collections::VecDeque;

use super::chunk::AudioChunk;

/// Queue of pending playback audio.
///
/// Enqueued buffers may have any length; [`fill`](Self::fill) slices them
/// into fixed-size output chunks, so one output chunk can span several
/// queue entries and one entry can span several output chunks.
///
/// Invariant: `cursor < current.len()` whenever `current` is `Some`.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    current: Option<AudioChunk>,
    cursor: usize,
    pending: VecDeque<AudioChunk>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer for playback. Empty buffers are ignored.
    pub fn push(&mut self, chunk: AudioChunk) {
        if chunk.is_empty() {
            return;
        }
        if self.current.is_none() {
            self.current = Some(chunk);
            self.cursor = 0;
        } else {
            self.pending.push_back(chunk);
        }
    }

    /// Number of buffers not yet fully played, counting the current one.
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Copy queued samples into `out`, advancing the cursor.
    ///
    /// Positions past the end of the queued audio are left untouched, so a
    /// zeroed `out` ends in silence. Returns the number of samples written.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            let Some(current) = self.current.as_ref() else {
                break;
            };
            let take = (out.len() - written).min(current.len() - self.cursor);
            out[written..written + take]
                .copy_from_slice(&current[self.cursor..self.cursor + take]);
            written += take;
            self.cursor += take;

            if self.cursor >= current.len() {
                self.current = self.pending.pop_front();
                self.cursor = 0;
            }
        }
        written
    }

    /// Drop everything still queued.
    pub fn clear(&mut self) {
        self.current = None;
        self.cursor = 0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(values: &[f32]) -> AudioChunk {
        AudioChunk::from_slice(values)
    }

    #[test]
    fn output_spans_queue_entries() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(&[1.0, 2.0, 3.0]));
        queue.push(chunk(&[4.0, 5.0]));
        assert_eq!(queue.len(), 2);

        let mut out = [0.0; 4];
        assert_eq!(queue.fill(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(queue.len(), 1);

        let mut out = [0.0; 4];
        assert_eq!(queue.fill(&mut out), 1);
        assert_eq!(out, [5.0, 0.0, 0.0, 0.0]);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn long_entry_spans_several_outputs() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(&[1.0, 2.0, 3.0, 4.0, 5.0]));

        let mut out = [0.0; 2];
        queue.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        queue.fill(&mut out);
        assert_eq!(out, [3.0, 4.0]);
        assert_eq!(queue.len(), 1);

        let mut out = [0.0; 2];
        assert_eq!(queue.fill(&mut out), 1);
        assert_eq!(out, [5.0, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_queue_writes_nothing() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(&[]));
        assert!(queue.is_empty());
        let mut out = [0.0; 3];
        assert_eq!(queue.fill(&mut out), 0);
        assert_eq!(out, [0.0; 3]);
    }

    #[test]
    fn exact_fit_advances_to_next_entry() {
        let mut queue = PlaybackQueue::new();
        queue.push(chunk(&[1.0, 2.0]));
        queue.push(chunk(&[3.0, 4.0]));
        let mut out = [0.0; 2];
        queue.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }
}
