//! Bit-vector Hamming space.
//!
//! Dataset rows are 0/1 components; they are packed 32 per `u32` word
//! (component `c` lands in word `c / 32`, bit `c % 32`). Distance is
//! the popcount of the XOR, an `i32`.

use crate::object::Object;
use crate::space::Space;

/// Hamming distance over bit-packed binary vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitHammingSpace;

impl BitHammingSpace {
    pub fn new() -> Self {
        BitHammingSpace
    }

    /// Pack a 0/1 component vector into 32-bit words.
    pub fn pack(bits: &[u32]) -> Vec<u32> {
        let mut words = vec![0u32; bits.len().div_ceil(32)];
        for (i, &b) in bits.iter().enumerate() {
            if b != 0 {
                words[i / 32] |= 1 << (i % 32);
            }
        }
        words
    }
}

impl Space<i32> for BitHammingSpace {
    type Component = u32;

    fn name(&self) -> String {
        "bit_hamming".to_string()
    }

    fn distance(&self, left: &Object, right: &Object) -> i32 {
        let x = left.typed::<u32>();
        let y = right.typed::<u32>();
        debug_assert_eq!(x.len(), y.len());
        x.iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a ^ b).count_ones() as i32)
            .sum()
    }

    fn parse_components(&self, text: &str) -> std::result::Result<Vec<u32>, String> {
        let mut bits = Vec::new();
        for tok in text.split_whitespace() {
            let v: u32 = tok
                .parse()
                .map_err(|_| format!("cannot parse component '{tok}'"))?;
            if v > 1 {
                return Err(format!("only zeros and ones are allowed, got '{tok}'"));
            }
            bits.push(v);
        }
        Ok(Self::pack(&bits))
    }

    fn unparse(&self, obj: &Object) -> String {
        let words = obj.typed::<u32>();
        let mut out = String::with_capacity(words.len() * 64);
        for c in 0..words.len() * 32 {
            if c > 0 {
                out.push(' ');
            }
            out.push(if words[c / 32] >> (c % 32) & 1 == 1 {
                '1'
            } else {
                '0'
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_is_lsb_first() {
        let words = BitHammingSpace::pack(&[1, 0, 0, 0, 1]);
        assert_eq!(words, vec![0b10001]);

        let mut bits = vec![0u32; 33];
        bits[32] = 1;
        assert_eq!(BitHammingSpace::pack(&bits), vec![0, 1]);
    }

    #[test]
    fn hamming_distance() {
        let space = BitHammingSpace::new();
        let a = space.create_from_vec(0, -1, &BitHammingSpace::pack(&[1, 1, 0, 0]));
        let b = space.create_from_vec(1, -1, &BitHammingSpace::pack(&[1, 0, 1, 0]));
        assert_eq!(space.distance(&a, &b), 2);
        assert_eq!(space.distance(&a, &a), 0);
    }

    #[test]
    fn rejects_non_binary_components() {
        let space = BitHammingSpace::new();
        assert!(space.parse_components("0 1 2").is_err());
        assert!(space.parse_components("0 1 x").is_err());
        assert_eq!(space.parse_components("0 1 1").unwrap(), vec![0b110]);
    }

    #[test]
    fn unparse_reparses_to_same_words() {
        let space = BitHammingSpace::new();
        let words = BitHammingSpace::pack(&[1, 0, 1, 1, 0, 0, 1]);
        let obj = space.create_from_vec(0, -1, &words);
        let text = space.unparse(&obj);
        assert_eq!(space.parse_components(&text).unwrap(), words);
    }
}
