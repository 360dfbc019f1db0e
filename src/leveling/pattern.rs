//! Pseudo-random test patterns.

/// Galois LFSR with a maximal-length tap set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lfsr {
    state: u32,
    taps: u32,
    mask: u32,
}

/// Taps of the 16-bit LFSR (x^16 + x^15 + x^13 + x^4 + 1).
pub const TAPS_16: u32 = 0xD008;
/// Taps of the 32-bit LFSR (x^32 + x^22 + x^2 + x + 1).
pub const TAPS_32: u32 = 0x8020_0003;

impl Lfsr {
    /// 16-bit LFSR. A zero seed is replaced by one.
    pub fn new16(seed: u16) -> Self {
        Self::with_taps(u32::from(seed), TAPS_16, 0xFFFF)
    }

    /// 32-bit LFSR. A zero seed is replaced by one.
    pub fn new32(seed: u32) -> Self {
        Self::with_taps(seed, TAPS_32, u32::MAX)
    }

    fn with_taps(seed: u32, taps: u32, mask: u32) -> Self {
        let state = match seed & mask {
            0 => 1,
            s => s,
        };
        Self { state, taps, mask }
    }

    /// Current state.
    pub fn state(&self) -> u32 {
        self.state
    }

    /// Advances one step and returns the new state.
    #[inline]
    pub fn step(&mut self) -> u32 {
        let lsb = self.state & 1;
        self.state >>= 1;
        if lsb != 0 {
            self.state ^= self.taps;
        }
        self.state &= self.mask;
        self.state
    }

    /// Next pattern byte.
    pub fn next_byte(&mut self) -> u8 {
        self.step() as u8
    }
}

/// Builds the test pattern for `lane` of `row`.
///
/// The seed depends on both, so neighbouring lanes never carry the same
/// data and a swapped lane shows up as a mismatch.
pub fn test_pattern(row: u32, lane: usize, len: usize) -> Vec<u8> {
    let seed = 0x1F2E_3D4C ^ row.rotate_left(8) ^ (lane as u32).wrapping_mul(0x9E37_79B9);
    let mut lfsr = Lfsr::new32(seed);
    (0..len).map(|_| lfsr.next_byte()).collect()
}

/// Counts differing bits between two patterns; missing bytes count fully.
pub fn bit_errors(expected: &[u8], got: &[u8]) -> u64 {
    let common: u64 = expected
        .iter()
        .zip(got)
        .map(|(a, b)| u64::from((a ^ b).count_ones()))
        .sum();
    let missing = expected.len().abs_diff(got.len()) as u64 * 8;
    common + missing
}
