use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;

/// Round `val` up to a multiple of `align`, which must be a power of two.
pub const fn raw_align_up(val: usize, align: usize) -> usize {
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

/// Copy `words` words from `from` to `to`. The two ranges may overlap, so this can be used to
/// slide objects towards lower addresses inside the same region.
///
/// # Safety
/// Both ranges must be mapped, word aligned, and writable for `to`.
pub unsafe fn conjoint_words(from: Address, to: Address, words: usize) {
    debug_assert!(from.is_aligned_to(BYTES_IN_WORD));
    debug_assert!(to.is_aligned_to(BYTES_IN_WORD));
    std::ptr::copy(from.to_ptr::<usize>(), to.to_mut_ptr::<usize>(), words);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;

    #[test]
    fn align_up_to_pages() {
        assert_eq!(raw_align_up(0, BYTES_IN_PAGE), 0);
        assert_eq!(raw_align_up(1, BYTES_IN_PAGE), BYTES_IN_PAGE);
        assert_eq!(raw_align_up(BYTES_IN_PAGE, BYTES_IN_PAGE), BYTES_IN_PAGE);
    }

    #[test]
    fn conjoint_words_overlapping_slide() {
        let mut buf: Vec<usize> = (0..8).collect();
        let base = Address::from_mut_ptr(buf.as_mut_ptr());
        // Slide words [2, 8) down to [0, 6).
        unsafe { conjoint_words(base + 2 * BYTES_IN_WORD, base, 6) };
        assert_eq!(&buf[..6], &[2, 3, 4, 5, 6, 7]);
    }
}
