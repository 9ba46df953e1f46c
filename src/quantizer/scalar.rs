//! Scalar quantizer: per-dimension min-max calibration.
//!
//! Training scans the population for per-dimension `(min, max)`; encoding
//! maps each component to `round((x - min) / scale)` clamped to the code
//! range, where `scale = (max - min) / (2^bits - 1)`. Codes use one byte
//! per dimension for 4 and 8 bits, two little-endian bytes for 16.
//!
//! Quantized distance dequantizes on the fly in a single pass and honors
//! the configured metric.

use serde_json::json;

use crate::distance::Metric;
use crate::error::{ProximaError, Result};
use crate::quantizer::Quantizer;

/// Per-dimension calibration from training.
#[derive(Clone, Debug)]
struct Calibration {
    min: f64,
    scale: f64,
}

/// Min-max scalar quantizer.
pub struct ScalarQuantizer {
    dimension: usize,
    bits: u8,
    metric: Metric,
    max_code: u32,
    calibration: Vec<Calibration>,
}

impl ScalarQuantizer {
    /// Creates an untrained scalar quantizer.
    ///
    /// `bits` must be 4, 8, or 16 (validated by the config layer).
    pub fn new(dimension: usize, bits: u8, metric: Metric) -> Self {
        Self {
            dimension,
            bits,
            metric,
            max_code: (1u32 << bits) - 1,
            calibration: Vec::new(),
        }
    }

    /// Bytes per encoded vector.
    pub fn code_len(&self) -> usize {
        if self.bits == 16 {
            self.dimension * 2
        } else {
            self.dimension
        }
    }

    /// Largest per-dimension scale; the reconstruction error bound is
    /// `|decode(encode(x)) - x| <= scale` per dimension.
    pub fn max_scale(&self) -> f64 {
        self.calibration.iter().map(|c| c.scale).fold(0.0, f64::max)
    }

    fn require_trained(&self) -> Result<()> {
        if !self.is_trained() {
            return Err(ProximaError::quantization("scalar quantizer is not trained"));
        }
        Ok(())
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(ProximaError::quantization(format!(
                "expected {} dimensions, got {len}",
                self.dimension
            )));
        }
        Ok(())
    }

    fn check_code_len(&self, len: usize) -> Result<()> {
        if len != self.code_len() {
            return Err(ProximaError::quantization(format!(
                "expected a {}-byte code, got {len}",
                self.code_len()
            )));
        }
        Ok(())
    }

    #[inline]
    fn quantize_component(&self, dim: usize, value: f64) -> u32 {
        let cal = &self.calibration[dim];
        let code = ((value - cal.min) / cal.scale).round();
        (code.max(0.0) as u32).min(self.max_code)
    }

    #[inline]
    fn dequantize_component(&self, dim: usize, code: u32) -> f64 {
        let cal = &self.calibration[dim];
        code as f64 * cal.scale + cal.min
    }

    /// Iterates the raw codes stored in `code`, one `u32` per dimension.
    fn codes_of<'a>(&self, code: &'a [u8]) -> impl Iterator<Item = u32> + 'a {
        let wide = self.bits == 16;
        let dim = self.dimension;
        (0..dim).map(move |i| {
            if wide {
                u16::from_le_bytes([code[i * 2], code[i * 2 + 1]]) as u32
            } else {
                code[i] as u32
            }
        })
    }
}

impl Quantizer for ScalarQuantizer {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "scalar"
    }

    fn is_trained(&self) -> bool {
        !self.calibration.is_empty()
    }

    fn train(&mut self, vectors: &[Vec<f64>]) -> Result<()> {
        if vectors.is_empty() {
            return Err(ProximaError::quantization(
                "cannot train scalar quantizer on an empty population",
            ));
        }

        let mut mins = vec![f64::INFINITY; self.dimension];
        let mut maxs = vec![f64::NEG_INFINITY; self.dimension];
        for vector in vectors {
            self.check_dimension(vector.len())?;
            for (dim, &value) in vector.iter().enumerate() {
                mins[dim] = mins[dim].min(value);
                maxs[dim] = maxs[dim].max(value);
            }
        }

        self.calibration = mins
            .into_iter()
            .zip(maxs)
            .map(|(min, max)| {
                let range = max - min;
                Calibration {
                    min,
                    // Zero range collapses to a single code; scale 1.0
                    // keeps decode exact at `min`
                    scale: if range == 0.0 {
                        1.0
                    } else {
                        range / self.max_code as f64
                    },
                }
            })
            .collect();
        Ok(())
    }

    fn encode(&self, vector: &[f64]) -> Result<Vec<u8>> {
        self.require_trained()?;
        self.check_dimension(vector.len())?;

        let mut code = Vec::with_capacity(self.code_len());
        for (dim, &value) in vector.iter().enumerate() {
            let q = self.quantize_component(dim, value);
            if self.bits == 16 {
                code.extend_from_slice(&(q as u16).to_le_bytes());
            } else {
                code.push(q as u8);
            }
        }
        Ok(code)
    }

    fn decode(&self, code: &[u8]) -> Result<Vec<f64>> {
        self.require_trained()?;
        self.check_code_len(code.len())?;
        Ok(self
            .codes_of(code)
            .enumerate()
            .map(|(dim, q)| self.dequantize_component(dim, q))
            .collect())
    }

    fn distance(&self, query: &[f64], code: &[u8]) -> Result<f64> {
        self.require_trained()?;
        self.check_dimension(query.len())?;
        self.check_code_len(code.len())?;

        // Single pass: dequantize each component and accumulate the
        // terms the configured metric needs
        match self.metric {
            Metric::Cosine => {
                let mut dot = 0.0;
                let mut norm_q = 0.0;
                let mut norm_d = 0.0;
                for (dim, q) in self.codes_of(code).enumerate() {
                    let d = self.dequantize_component(dim, q);
                    let qv = query[dim];
                    dot += qv * d;
                    norm_q += qv * qv;
                    norm_d += d * d;
                }
                let norm_q = norm_q.sqrt();
                let norm_d = norm_d.sqrt();
                if norm_q < 1e-10 || norm_d < 1e-10 {
                    return Ok(1.0);
                }
                Ok((1.0 - dot / (norm_q * norm_d)).clamp(0.0, 2.0))
            }
            Metric::Euclidean => {
                let mut sum = 0.0;
                for (dim, q) in self.codes_of(code).enumerate() {
                    let diff = query[dim] - self.dequantize_component(dim, q);
                    sum += diff * diff;
                }
                Ok(sum.sqrt())
            }
            Metric::DotProduct => {
                let mut dot = 0.0;
                for (dim, q) in self.codes_of(code).enumerate() {
                    dot += query[dim] * self.dequantize_component(dim, q);
                }
                Ok(-dot)
            }
            Metric::Manhattan => {
                let mut sum = 0.0;
                for (dim, q) in self.codes_of(code).enumerate() {
                    sum += (query[dim] - self.dequantize_component(dim, q)).abs();
                }
                Ok(sum)
            }
        }
    }

    fn stats(&self) -> serde_json::Map<String, serde_json::Value> {
        let raw_bytes = self.dimension * std::mem::size_of::<f64>();
        let mut stats = serde_json::Map::new();
        stats.insert("type".into(), json!(self.kind()));
        stats.insert("trained".into(), json!(self.is_trained()));
        stats.insert("bits".into(), json!(self.bits));
        stats.insert("metric".into(), json!(self.metric.name()));
        stats.insert("code_bytes".into(), json!(self.code_len()));
        stats.insert(
            "compression_ratio".into(),
            json!(raw_bytes as f64 / self.code_len() as f64),
        );
        stats
    }

    fn close(&mut self) -> Result<()> {
        self.calibration.clear();
        Ok(())
    }
}
