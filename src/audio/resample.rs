/// Streaming linear-interpolation resampler for mono chunks.
///
/// The read position carries across calls, so chunk boundaries (ALSA periods
/// of any size) do not add or drop samples.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    /// Next output position, relative to the start of the next chunk. `-1.0`
    /// addresses the last sample of the previous chunk.
    pos: f64,
    last: f32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            last: 0.0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let n = input.len();
        let at = |i: isize| if i < 0 { self.last } else { input[i as usize] };
        let mut out = Vec::with_capacity((n as f64 / self.step).ceil() as usize + 1);
        let mut pos = self.pos;
        while pos < (n - 1) as f64 {
            let i = pos.floor() as isize;
            let frac = (pos - i as f64) as f32;
            let a = at(i);
            let b = at(i + 1);
            out.push(a + (b - a) * frac);
            pos += self.step;
        }

        self.pos = pos - n as f64;
        self.last = input[n - 1];
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(range: std::ops::Range<usize>) -> Vec<f32> {
        range.map(|i| i as f32).collect()
    }

    #[test]
    fn same_rate_is_untouched() {
        let mut r = Resampler::new(16_000, 16_000);
        assert!(r.is_passthrough());
        assert_eq!(r.process(&[0.1, -0.2]), vec![0.1, -0.2]);
    }

    #[test]
    fn downsampling_keeps_position_across_uneven_chunks() {
        let mut r = Resampler::new(48_000, 16_000);
        let mut out = r.process(&ramp(0..7));
        out.extend(r.process(&ramp(7..12)));
        out.extend(r.process(&ramp(12..24)));
        assert_eq!(out, vec![0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0]);
    }

    #[test]
    fn upsampling_interpolates_over_the_chunk_boundary() {
        let mut r = Resampler::new(8_000, 16_000);
        let mut out = r.process(&[0.0, 2.0]);
        out.extend(r.process(&[4.0]));
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn output_length_follows_the_rate_ratio() {
        let mut r = Resampler::new(44_100, 16_000);
        let mut total = 0;
        for _ in 0..100 {
            total += r.process(&vec![0.0; 441]).len();
        }
        // One second in, one second out, give or take the interpolation tail.
        assert!((15_998..=16_001).contains(&total), "got {}", total);
    }
}
