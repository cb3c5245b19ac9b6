//! Wrapper types around Bitvec.
use bitvec::prelude::*;

/// Bitfield where index = piece, as sent by peers on the `bitfield`
/// message. Also used to track which blocks of a piece arrived.
pub type Bitfield = BitVec<u8, Msb0>;

pub trait BitfieldExt {
    /// A bitfield of `len` bits, all unset.
    fn zeroed(len: usize) -> Bitfield {
        bitvec![u8, Msb0; 0; len]
    }

    /// Whether bit `index` is set, out of range bits are unset.
    fn has(&self, index: usize) -> bool;
}

impl BitfieldExt for Bitfield {
    fn has(&self, index: usize) -> bool {
        self.get(index).map(|b| *b).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first() {
        // 0b1100_0001 means pieces 0, 1 and 7
        let field = Bitfield::from_vec(vec![0b1100_0001, 0]);

        assert!(field.has(0));
        assert!(field.has(1));
        assert!(!field.has(2));
        assert!(field.has(7));
        assert!(!field.has(8));
        assert!(!field.has(100));
        assert_eq!(field.len(), 16);
    }

    #[test]
    fn zeroed() {
        let field = Bitfield::zeroed(10);
        assert_eq!(field.len(), 10);
        assert!(field.not_any());
    }
}
