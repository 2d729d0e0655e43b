//! Power-spectrum analysis for the receive path.
//!
//! One planned forward FFT per frame size; the output is magnitude
//! squared with the upper half folded onto the lower bins, mirroring how
//! a real-input transform concentrates its energy.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    size: usize,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            buf: vec![Complex::default(); size],
            scratch,
            fft,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Folded power spectrum of one frame. `out` must hold `size`
    /// entries; bins `[1, size/2)` receive the mirrored upper-half
    /// power. Returns the total unfolded power, which the silence
    /// detector compares against its floor.
    pub fn power_spectrum(&mut self, samples: &[f32], out: &mut [f32]) -> f64 {
        debug_assert_eq!(samples.len(), self.size);
        debug_assert_eq!(out.len(), self.size);

        for (b, &s) in self.buf.iter_mut().zip(samples) {
            *b = Complex::new(s, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

        let mut total = 0.0f64;
        for (o, c) in out.iter_mut().zip(&self.buf) {
            *o = c.norm_sqr();
            total += *o as f64;
        }
        for i in 1..self.size / 2 {
            out[i] += out[self.size - i];
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_pure_tone_peaks_at_its_bin() {
        let n = 1024;
        let bin = 40;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / n as f32).sin())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(n);
        let mut spectrum = vec![0.0f32; n];
        let total = analyzer.power_spectrum(&samples, &mut spectrum);

        assert!(total > 1.0);
        let peak = spectrum[1..n / 2]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i + 1)
            .unwrap();
        assert_eq!(peak, bin);
        // A tone on an exact bin leaks nowhere else
        assert!(spectrum[bin] > 100.0 * spectrum[bin + 1].max(spectrum[bin - 1]));
    }

    #[test]
    fn test_folding_doubles_tone_power() {
        let n = 256;
        let bin = 10;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / n as f32).cos())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(n);
        let mut spectrum = vec![0.0f32; n];
        let total = analyzer.power_spectrum(&samples, &mut spectrum);

        // Both halves of the conjugate-symmetric spectrum land in the bin
        let expected = total as f32;
        assert!((spectrum[bin] - expected).abs() < expected * 1e-3);
    }

    #[test]
    fn test_silence_has_no_power() {
        let n = 1024;
        let mut analyzer = SpectrumAnalyzer::new(n);
        let mut spectrum = vec![0.0f32; n];
        let total = analyzer.power_spectrum(&vec![0.0; n], &mut spectrum);
        assert_eq!(total, 0.0);
        assert!(spectrum.iter().all(|&p| p == 0.0));
    }
}
