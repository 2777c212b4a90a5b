//! Audio frame interchange record.
//!
//! Capture and FFT happen outside the engine; the host fills one of these per
//! rendered frame. All fields are plain data so the record can be snapshotted
//! into the preset state by value.

/// Waveform samples delivered per channel and frame.
pub const WAVEFORM_SAMPLES: usize = 576;

/// Spectrum bins delivered per channel and frame.
pub const SPECTRUM_SAMPLES: usize = 512;

/// One frame of analyzed audio.
///
/// `bass`/`mid`/`treb` are the instantaneous band volumes, the `_att`
/// variants are the host's time-attenuated versions used for smoother
/// visual reactions. `vol` is the overall loudness.
#[derive(Debug, Clone)]
pub struct FrameAudioData {
    pub waveform_left: Vec<f32>,
    pub waveform_right: Vec<f32>,
    pub spectrum_left: Vec<f32>,
    pub spectrum_right: Vec<f32>,

    pub vol: f64,
    pub bass: f64,
    pub mid: f64,
    pub treb: f64,
    pub vol_att: f64,
    pub bass_att: f64,
    pub mid_att: f64,
    pub treb_att: f64,
}

impl Default for FrameAudioData {
    fn default() -> Self {
        Self {
            waveform_left: vec![0.0; WAVEFORM_SAMPLES],
            waveform_right: vec![0.0; WAVEFORM_SAMPLES],
            spectrum_left: vec![0.0; SPECTRUM_SAMPLES],
            spectrum_right: vec![0.0; SPECTRUM_SAMPLES],
            vol: 0.0,
            bass: 0.0,
            mid: 0.0,
            treb: 0.0,
            vol_att: 0.0,
            bass_att: 0.0,
            mid_att: 0.0,
            treb_att: 0.0,
        }
    }
}
