use anyhow::Context;
use clap::ValueEnum;
use dab_core::params::ViterbiBit;
use std::io::{ErrorKind, Read, Write};
use std::path::Path;

/// On-disk encoding of one soft bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SoftBitFormat {
    /// One signed byte per bit, as most demappers emit.
    S8,
    /// One native-endian i16 per bit.
    S16,
}

impl SoftBitFormat {
    pub fn bytes_per_bit(self) -> usize {
        match self {
            Self::S8 => 1,
            Self::S16 => 2,
        }
    }
}

/// `-` means stdin.
pub fn open(path: &Path) -> anyhow::Result<(Box<dyn Read + Send>, String)> {
    if path.as_os_str() == "-" {
        return Ok((Box::new(std::io::stdin()), "stdin".to_string()));
    }
    let file =
        std::fs::File::open(path).with_context(|| format!("open input {}", path.display()))?;
    Ok((
        Box::new(std::io::BufReader::new(file)),
        path.display().to_string(),
    ))
}

pub struct FrameReader<R> {
    reader: R,
    format: SoftBitFormat,
    scratch: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, format: SoftBitFormat) -> Self {
        Self {
            reader,
            format,
            scratch: Vec::new(),
        }
    }

    /// Fills `out` with the next frame. Returns `Ok(false)` on a clean end of
    /// stream; a frame cut short by EOF is an error.
    pub fn read_frame(&mut self, out: &mut [ViterbiBit]) -> anyhow::Result<bool> {
        let want = out.len() * self.format.bytes_per_bit();
        self.scratch.resize(want, 0);

        let mut filled = 0usize;
        while filled < want {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("soft bit read"),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        anyhow::ensure!(
            filled == want,
            "input ended mid-frame ({filled} of {want} bytes)"
        );

        match self.format {
            SoftBitFormat::S8 => {
                for (dst, &src) in out.iter_mut().zip(self.scratch.iter()) {
                    *dst = ViterbiBit::from(src as i8);
                }
            }
            SoftBitFormat::S16 => {
                let raw: Vec<i16> = bytemuck::pod_collect_to_vec(&self.scratch[..]);
                out.copy_from_slice(&raw);
            }
        }
        Ok(true)
    }
}

/// Writes soft bits in the given format.
pub fn write_soft_bits(
    w: &mut dyn Write,
    bits: &[ViterbiBit],
    format: SoftBitFormat,
) -> anyhow::Result<()> {
    match format {
        SoftBitFormat::S8 => {
            let bytes: Vec<u8> = bits
                .iter()
                .map(|&b| b.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8)
                .collect();
            w.write_all(&bytes).context("soft bit write")
        }
        SoftBitFormat::S16 => w
            .write_all(bytemuck::cast_slice(bits))
            .context("soft bit write"),
    }
}
