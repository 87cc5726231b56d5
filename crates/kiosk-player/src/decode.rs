//! Decode stage.
//!
//! Probes a track file synchronously (so a bad track fails before anything is
//! spawned), then decodes packets on a background thread into a [`SampleQueue`].

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::queue::{SampleQueue, capacity_for};

/// A probed track whose samples are being decoded into `queue`.
pub struct DecodedTrack {
    pub spec: SignalSpec,
    pub queue: Arc<SampleQueue>,
    pub duration_ms: Option<u64>,
}

/// Open and probe `path`, then start the decoder thread.
pub fn open_track(path: &Path, buffer_seconds: f32) -> Result<DecodedTrack> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track in {:?}", path))?;
    let params = track.codec_params.clone();
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout in {:?}", path))?;
    let rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate in {:?}", path))?;
    let spec = SignalSpec::new(rate, channels);
    let duration_ms = duration_ms(&params);

    let queue = Arc::new(SampleQueue::new(
        channels.count(),
        capacity_for(rate, channels.count(), buffer_seconds),
    ));

    let queue_for_thread = queue.clone();
    thread::spawn(move || match decode_packets(format, &params, &queue_for_thread) {
        Ok(()) => queue_for_thread.close(),
        Err(e) => {
            tracing::warn!("decoder stopped: {e:#}");
            queue_for_thread.fail(format!("{e:#}"));
        }
    });

    Ok(DecodedTrack {
        spec,
        queue,
        duration_ms,
    })
}

fn decode_packets(
    mut format: Box<dyn FormatReader>,
    params: &CodecParameters,
    queue: &SampleQueue,
) -> Result<()> {
    let mut decoder = symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .context("create decoder")?;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => return Ok(()),
            Err(e) => return Err(anyhow!("read packet: {e}")),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable packet: {e}");
                continue;
            }
            Err(e) => return Err(anyhow!("decode packet: {e}")),
        };

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buf.copy_interleaved_ref(decoded);
        if !queue.push_blocking(buf.samples()) {
            // Consumer went away (track stopped).
            return Ok(());
        }
    }
}

/// Track duration from codec metadata, when the container reports a frame count.
fn duration_ms(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = u64::from(params.sample_rate?);
    (rate > 0).then(|| frames.saturating_mul(1000) / rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_requires_positive_rate() {
        let mut params = CodecParameters::new();
        params.n_frames = Some(44_100 * 3);
        params.sample_rate = Some(0);
        assert!(duration_ms(&params).is_none());

        params.sample_rate = Some(44_100);
        assert_eq!(duration_ms(&params), Some(3_000));
    }

    #[test]
    fn open_track_fails_for_missing_file() {
        let err = open_track(Path::new("/definitely/not/here/track01.wav"), 1.0)
            .err()
            .expect("missing file must fail");
        assert!(format!("{err:#}").contains("open"));
    }
}
