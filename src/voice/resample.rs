//! Sample rate conversion with rubato
//!
//! [`StreamResampler`] keeps partial chunks between calls so live audio can
//! be fed in arbitrary slices. [`resample`] converts a whole buffer and
//! trims the filter delay so the output length tracks the rate ratio.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Input frames per FFT chunk
const CHUNK_SIZE: usize = 1024;

const SUB_CHUNKS: usize = 2;

fn resample_error(e: impl std::fmt::Display) -> Error {
    Error::Audio(format!("resampling failed: {e}"))
}

/// Incremental mono resampler; a passthrough when both rates match
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Resampler from `from` Hz to `to` Hz
    ///
    /// # Errors
    ///
    /// Returns error if rubato rejects the rate pair
    pub fn new(from: u32, to: u32) -> Result<Self> {
        let inner = if from == to || from == 0 || to == 0 {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
                    .map_err(resample_error)?,
            )
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Output frames the filter lags behind its input
    #[must_use]
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, Resampler::output_delay)
    }

    /// Feed samples, returning every output frame completed so far
    ///
    /// # Errors
    ///
    /// Returns error if a chunk fails to process
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = resampler.process(&[chunk], None).map_err(resample_error)?;
            output.extend_from_slice(&result[0]);
        }
        Ok(output)
    }

    /// Process whatever is buffered, padding the last chunk with silence
    ///
    /// # Errors
    ///
    /// Returns error if the partial chunk fails to process
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(std::mem::take(&mut self.pending));
        };
        let rest = std::mem::take(&mut self.pending);
        let result = if rest.is_empty() {
            resampler.process_partial::<Vec<f32>>(None, None)
        } else {
            resampler.process_partial(Some(&[rest][..]), None)
        }
        .map_err(resample_error)?;
        Ok(result.into_iter().next().unwrap_or_default())
    }
}

/// Convert a whole mono buffer from `from` Hz to `to` Hz
///
/// The result holds `len * to / from` samples.
///
/// # Errors
///
/// Returns error if resampling fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || from == 0 || to == 0 || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let expected = (samples.len() as u64 * u64::from(to) / u64::from(from)) as usize;

    let mut resampler = StreamResampler::new(from, to)?;
    let delay = resampler.output_delay();
    let mut output = resampler.push(samples)?;

    // drain the filter tail, at most a few chunks of silence
    for _ in 0..4 {
        if output.len() >= delay + expected {
            break;
        }
        output.extend(resampler.flush()?);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}
