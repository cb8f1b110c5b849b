use anyhow::Context;
use dab_core::audio::frame::{frames_to_pcm_s16, Frame};
use dab_core::audio::sink::BlockWriter;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// `-` means stdout.
pub fn create(path: &Path) -> anyhow::Result<(Box<dyn Write + Send>, String)> {
    if path.as_os_str() == "-" {
        return Ok((Box::new(std::io::stdout()), "stdout".to_string()));
    }
    let file =
        std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok((
        Box::new(std::io::BufWriter::new(file)),
        path.display().to_string(),
    ))
}

/// Turns mixed blocks into interleaved s16 PCM on `out`.
///
/// Write errors are logged once and further blocks are discarded, so a
/// closed pipe downstream does not take the sink thread down.
pub fn pcm_writer(
    mut out: Box<dyn Write + Send>,
    name: String,
    frames_written: Arc<AtomicU64>,
) -> BlockWriter {
    let mut pcm = Vec::<i16>::new();
    let mut is_failed = false;
    Box::new(move |frames: &[Frame], _sample_rate: f32| {
        if is_failed {
            return;
        }
        frames_to_pcm_s16(frames, &mut pcm);
        let result = out
            .write_all(bytemuck::cast_slice(&pcm))
            .and_then(|()| out.flush());
        match result {
            Ok(()) => {
                frames_written.fetch_add(frames.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                is_failed = true;
                tracing::error!(output = %name, error = ?e, "pcm output failed, muting");
            }
        }
    })
}
