use std::mem;

/// Word size in bytes on the current machine. Boundary tags are exactly one
/// word, see [`crate::block`].
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// Double word size in bytes. Every block size is a multiple of this, which
/// also makes it the alignment guarantee of every pointer we hand out.
pub(crate) const DWORD: usize = 2 * WORD;

/// Rounds `size` up to the next multiple of the double word, keeping blocks
/// aligned on both ends.
#[inline]
pub(crate) fn round_dword(size: usize) -> usize {
    (size + DWORD - 1) & !(DWORD - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dword_rounding() {
        let mut alignments = Vec::new();

        for i in 0..10 {
            // On 64 bit machine: (1..16), (17..32), (33..48) and so on.
            let sizes = (DWORD * i + 1)..=(DWORD * (i + 1));
            // Matching the sizes above, this would be: 16, 32, 48 and so on.
            let expected_alignment = DWORD * (i + 1);
            alignments.push((sizes, expected_alignment));
        }

        for (sizes, expected) in alignments {
            for size in sizes {
                assert_eq!(expected, round_dword(size));
            }
        }

        assert_eq!(round_dword(0), 0);
    }
}
