//! Transient playback voice: one repetition of a loop

use crate::audio::{AudioBuffer, AudioFrame};
use crate::graph::envelope::CrossfadeEnvelope;
use std::fmt;
use std::sync::Arc;

/// Identity of one scheduled repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice-{}", self.0)
    }
}

/// What a voice contributes at one output tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceOutput {
    /// Start instant not reached yet
    Pending,
    Frame(AudioFrame),
    /// Stop instant passed or buffer exhausted
    Finished,
}

#[derive(Debug, Clone)]
pub(crate) struct Voice {
    pub id: VoiceId,
    pub bus: usize,
    pub buffer: Arc<AudioBuffer>,
    pub envelope: CrossfadeEnvelope,
    /// Playback begins at `envelope.start`
    pub stop_at: i64,
}

impl Voice {
    /// Render the frame for tick `t` (before bus gain)
    pub fn output_at(&self, t: i64, ticks_per_frame: i64) -> VoiceOutput {
        if t >= self.stop_at {
            return VoiceOutput::Finished;
        }
        let offset = t - self.envelope.start;
        if offset < 0 {
            return VoiceOutput::Pending;
        }
        let index = (offset / ticks_per_frame) as usize;
        match self.buffer.frame(index) {
            Some(frame) => VoiceOutput::Frame(frame.scaled(self.envelope.value_at(t))),
            None => VoiceOutput::Finished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopstation_common::FadeCurve;

    fn voice(start: i64, stop: i64) -> Voice {
        let buffer = AudioBuffer::from_interleaved_stereo(vec![0.5; 8], 44100);
        let end = start + buffer.duration_ticks();
        Voice {
            id: VoiceId(1),
            bus: 0,
            buffer: Arc::new(buffer),
            envelope: CrossfadeEnvelope::new(start, end, 0, FadeCurve::Linear),
            stop_at: stop,
        }
    }

    #[test]
    fn test_lifecycle() {
        let v = voice(640, 10_000);
        assert_eq!(v.output_at(0, 640), VoiceOutput::Pending);
        assert_eq!(
            v.output_at(640, 640),
            VoiceOutput::Frame(AudioFrame { left: 0.5, right: 0.5 })
        );
        // 4 frames long: frame index 4 is past the end
        assert_eq!(v.output_at(640 * 5, 640), VoiceOutput::Finished);
    }

    #[test]
    fn test_hard_stop_before_buffer_end() {
        let v = voice(0, 640);
        assert!(matches!(v.output_at(0, 640), VoiceOutput::Frame(_)));
        assert_eq!(v.output_at(640, 640), VoiceOutput::Finished);
    }
}
