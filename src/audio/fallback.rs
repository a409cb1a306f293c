//! Silent placeholder audio for degraded pipeline runs.

use std::io::Cursor;
use std::time::Duration;

/// Sample rate of generated placeholder clips. Matches the synthesis
/// service's output rate so players treat both the same way.
const FALLBACK_SAMPLE_RATE: u32 = 24_000;

/// Render a silent mono 16-bit WAV clip of the given duration.
///
/// Used whenever speech synthesis is skipped or fails, so playback
/// endpoints always have valid audio to serve.
pub fn silent_wav(duration: Duration) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: FALLBACK_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let num_samples = (FALLBACK_SAMPLE_RATE as f64 * duration.as_secs_f64()) as usize;

    let mut cursor = Cursor::new(Vec::new());
    {
        // Writing zeros to an in-memory cursor cannot fail.
        let mut writer = match hound::WavWriter::new(&mut cursor, spec) {
            Ok(writer) => writer,
            Err(_) => return Vec::new(),
        };
        for _ in 0..num_samples {
            let _ = writer.write_sample(0i16);
        }
        let _ = writer.finalize();
    }

    cursor.into_inner()
}
