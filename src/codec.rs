//! Binary codec utilities: fixed-layout wire records and parser combinators.
//!
//! Records pin their byte layout explicitly (offsets, widths, byte order)
//! instead of reinterpreting native struct memory, so encode/decode is
//! deterministic across targets.

/// A fixed-layout wire record.
///
/// `encode` and `decode` operate on exactly [`Wire::SIZE`] bytes; callers
/// guarantee the slice is large enough (the parser combinators below do).
pub trait Wire: Sized {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

pub fn read_u16_be(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

pub fn read_i16_be(buf: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([buf[at], buf[at + 1]])
}

pub fn write_u16_be(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn write_i16_be(buf: &mut [u8], at: usize, value: i16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

/// A parsing stage over the front of a byte buffer.
///
/// `parse` returns the number of bytes consumed (> 0) on success, or 0 when
/// the input is insufficient or does not match — the caller then waits for
/// more bytes or drops the buffer. `output` yields the last decoded value
/// (the type's default before any successful parse).
pub trait Parse {
    type Output;

    fn parse(&mut self, input: &[u8]) -> usize;
    fn output(&self) -> Self::Output;
}

/// Captures exactly `N` raw bytes.
#[derive(Debug)]
pub struct NBytes<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> Default for NBytes<N> {
    fn default() -> Self {
        Self { data: [0; N] }
    }
}

impl<const N: usize> Parse for NBytes<N> {
    type Output = [u8; N];

    fn parse(&mut self, input: &[u8]) -> usize {
        if input.len() < N {
            return 0;
        }
        self.data.copy_from_slice(&input[..N]);
        N
    }

    fn output(&self) -> [u8; N] {
        self.data
    }
}

/// Captures one fixed-layout record.
#[derive(Debug, Default)]
pub struct Record<T: Wire + Clone + Default> {
    value: T,
}

impl<T: Wire + Clone + Default> Parse for Record<T> {
    type Output = T;

    fn parse(&mut self, input: &[u8]) -> usize {
        if input.len() < T::SIZE {
            return 0;
        }
        self.value = T::decode(&input[..T::SIZE]);
        T::SIZE
    }

    fn output(&self) -> T {
        self.value.clone()
    }
}

/// Matches an exact byte sequence (frame magic, delimiters).
#[derive(Debug)]
pub struct Literal<const N: usize> {
    expected: [u8; N],
}

impl<const N: usize> Literal<N> {
    pub fn new(expected: [u8; N]) -> Self {
        Self { expected }
    }
}

impl<const N: usize> Parse for Literal<N> {
    type Output = [u8; N];

    fn parse(&mut self, input: &[u8]) -> usize {
        if input.len() < N || input[..N] != self.expected {
            return 0;
        }
        N
    }

    fn output(&self) -> [u8; N] {
        self.expected
    }
}

/// Consumes everything left in the buffer.
#[derive(Debug, Default)]
pub struct Remaining {
    data: Vec<u8>,
}

impl Parse for Remaining {
    type Output = Vec<u8>;

    fn parse(&mut self, input: &[u8]) -> usize {
        self.data = input.to_vec();
        input.len()
    }

    fn output(&self) -> Vec<u8> {
        self.data.clone()
    }
}

// Combined parsers: a tuple of stages runs them in sequence over one buffer
// and succeeds only if every stage does. Any stage returning 0 makes the
// whole attempt consume 0 bytes. Stage outputs are reached by tuple index.
macro_rules! impl_parse_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Parse),+> Parse for ($($name,)+) {
            type Output = ($($name::Output,)+);

            fn parse(&mut self, input: &[u8]) -> usize {
                let mut pos = 0;
                $(
                    let consumed = self.$idx.parse(&input[pos..]);
                    if consumed == 0 {
                        return 0;
                    }
                    pos += consumed;
                )+
                pos
            }

            fn output(&self) -> Self::Output {
                ($(self.$idx.output(),)+)
            }
        }
    };
}

impl_parse_tuple!(A: 0);
impl_parse_tuple!(A: 0, B: 1);
impl_parse_tuple!(A: 0, B: 1, C: 2);
impl_parse_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_parse_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Sample {
        a: u16,
        b: i16,
    }

    impl Wire for Sample {
        const SIZE: usize = 4;

        fn encode(&self, buf: &mut [u8]) {
            write_u16_be(buf, 0, self.a);
            write_i16_be(buf, 2, self.b);
        }

        fn decode(buf: &[u8]) -> Self {
            Self {
                a: read_u16_be(buf, 0),
                b: read_i16_be(buf, 2),
            }
        }
    }

    #[test]
    fn record_round_trip() {
        let orig = Sample { a: 0xA55A, b: -1234 };
        let mut buf = [0u8; 4];
        orig.encode(&mut buf);
        assert_eq!(Sample::decode(&buf), orig);
    }

    #[test]
    fn nbytes_insufficient_input() {
        let mut p = NBytes::<4>::default();
        assert_eq!(p.parse(&[1, 2, 3]), 0);
        assert_eq!(p.parse(&[1, 2, 3, 4, 5]), 4);
        assert_eq!(p.output(), [1, 2, 3, 4]);
    }

    #[test]
    fn literal_mismatch_consumes_nothing() {
        let mut p = Literal::new([0x55, 0xAA]);
        assert_eq!(p.parse(&[0x55, 0xAB]), 0);
        assert_eq!(p.parse(&[0x55]), 0);
        assert_eq!(p.parse(&[0x55, 0xAA, 0x01]), 2);
    }

    #[test]
    fn remaining_takes_all() {
        let mut p = Remaining::default();
        assert_eq!(p.parse(&[9, 8, 7]), 3);
        assert_eq!(p.output(), vec![9, 8, 7]);
    }

    #[test]
    fn combined_chain_in_order() {
        let mut p = (
            Literal::new([0x55, 0xAA]),
            NBytes::<1>::default(),
            Record::<Sample>::default(),
        );
        let buf = [0x55, 0xAA, 0x07, 0x01, 0x02, 0xFF, 0xFE];
        assert_eq!(p.parse(&buf), 7);
        assert_eq!(p.output().1, [0x07]);
        assert_eq!(p.output().2, Sample { a: 0x0102, b: -2 });
    }

    #[test]
    fn combined_failure_mid_chain_consumes_zero() {
        // The first two stages would succeed in isolation; a short record
        // at stage three must roll the whole attempt back to 0.
        let mut p = (
            Literal::new([0x55, 0xAA]),
            NBytes::<1>::default(),
            Record::<Sample>::default(),
        );
        let buf = [0x55, 0xAA, 0x07, 0x01];
        assert_eq!(p.parse(&buf), 0);
    }

    #[test]
    fn combined_failure_first_stage() {
        let mut p = (Literal::new([0x55, 0xAA]), Remaining::default());
        assert_eq!(p.parse(&[0x00, 0xAA, 1, 2]), 0);
    }
}
