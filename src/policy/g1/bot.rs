use crate::util::constants::{BYTES_IN_CARD, LOG_BYTES_IN_CARD};
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The block offset table of one region. For every card it records the start of a block
/// (object or filler) at or before the first word of the card, so that the start of the
/// block covering any address can be found by walking forward from there.
pub struct BlockOffsetTable {
    bottom: Address,
    end: Address,
    /// Block start addresses. Zero means "unknown", in which case lookups walk from `bottom`.
    table: Box<[AtomicUsize]>,
}

impl BlockOffsetTable {
    pub fn new(bottom: Address, end: Address) -> Self {
        debug_assert!(bottom.is_aligned_to(BYTES_IN_CARD));
        let cards = (end - bottom) >> LOG_BYTES_IN_CARD;
        Self {
            bottom,
            end,
            table: (0..cards).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    #[inline(always)]
    fn index(&self, addr: Address) -> usize {
        debug_assert!(
            addr >= self.bottom && addr < self.end,
            "{} is outside [{}, {})",
            addr,
            self.bottom,
            self.end
        );
        (addr - self.bottom) >> LOG_BYTES_IN_CARD
    }

    fn card_start(&self, index: usize) -> Address {
        self.bottom + (index << LOG_BYTES_IN_CARD)
    }

    /// Record the block `[start, end)`. Only the part of the block inside this region is
    /// recorded, so a humongous object updates every region it covers with its own start.
    pub fn update_for_block(&self, start: Address, end: Address) {
        debug_assert!(start < end);
        let from = start.max(self.bottom);
        let to = end.min(self.end);
        if from >= to {
            return;
        }
        // The first card whose first word lies inside the block.
        let first = (from.align_up(BYTES_IN_CARD) - self.bottom) >> LOG_BYTES_IN_CARD;
        let last = (to - 1 - self.bottom) >> LOG_BYTES_IN_CARD;
        for i in first..=last {
            self.table[i].store(start.as_usize(), Ordering::Relaxed);
        }
    }

    /// The recorded block start for the card containing `addr`, or `bottom` if unknown.
    pub fn entry(&self, addr: Address) -> Address {
        let raw = self.table[self.index(addr)].load(Ordering::Relaxed);
        if raw == 0 {
            self.bottom
        } else {
            unsafe { Address::from_usize(raw) }
        }
    }

    /// The start of the block covering `addr`. `addr` must be below the region's top.
    pub fn block_start<VM: VMBinding>(&self, addr: Address) -> Address {
        let mut cursor = self.entry(addr);
        debug_assert!(cursor <= addr);
        loop {
            let size = VM::VMObjectModel::size_in_words(ObjectReference::from_raw_address(cursor));
            debug_assert!(size > 0, "zero sized block at {}", cursor);
            let next = cursor.add_words(size);
            if next > addr {
                return cursor;
            }
            cursor = next;
        }
    }

    /// Forget every entry.
    pub fn reset(&self) {
        for entry in self.table.iter() {
            entry.store(0, Ordering::Relaxed);
        }
    }

    /// Check that every card boundary below `top` resolves to a block start that is reached by
    /// walking the region from bottom.
    pub fn verify<VM: VMBinding>(&self, top: Address) -> Result<(), String> {
        let mut starts = vec![];
        let mut cursor = self.bottom;
        while cursor < top {
            starts.push(cursor);
            cursor = cursor.add_words(VM::VMObjectModel::size_in_words(
                ObjectReference::from_raw_address(cursor),
            ));
        }
        let mut covering = 0;
        for i in 0..self.table.len() {
            let card = self.card_start(i);
            if card >= top {
                break;
            }
            while covering + 1 < starts.len() && starts[covering + 1] <= card {
                covering += 1;
            }
            let found = self.block_start::<VM>(card);
            if found != starts[covering] {
                return Err(format!(
                    "card {} at {}: block_start {} but the walk says {}",
                    i, card, found, starts[covering]
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::{BYTES_IN_WORD, WORDS_IN_CARD};
    use crate::util::test_util::mock_vm::{MockVM, TestHeapMemory};

    #[test]
    fn update_covers_crossed_cards() {
        let mem = TestHeapMemory::new(4 * BYTES_IN_CARD);
        let bottom = mem.start();
        let bot = BlockOffsetTable::new(bottom, bottom + 4 * BYTES_IN_CARD);
        // A block that starts in card 0 and ends inside card 2.
        let start = bottom + 8 * BYTES_IN_WORD;
        let end = bottom + 2 * BYTES_IN_CARD + 16;
        bot.update_for_block(start, end);
        assert_eq!(bot.entry(bottom), bottom);
        assert_eq!(bot.entry(bottom + BYTES_IN_CARD), start);
        assert_eq!(bot.entry(bottom + 2 * BYTES_IN_CARD), start);
        assert_eq!(bot.entry(bottom + 3 * BYTES_IN_CARD), bottom);
        bot.reset();
        assert_eq!(bot.entry(bottom + BYTES_IN_CARD), bottom);
    }

    #[test]
    fn block_start_walks_objects() {
        let mem = TestHeapMemory::new(4 * BYTES_IN_CARD);
        let bottom = mem.start();
        let bot = BlockOffsetTable::new(bottom, bottom + 4 * BYTES_IN_CARD);
        // Objects of 24 words each, laid out densely.
        let size = 24;
        let mut cursor = bottom;
        let top = bottom + 3 * BYTES_IN_CARD;
        while cursor.add_words(size) <= top {
            MockVM::init_object(cursor, size, 0);
            bot.update_for_block(cursor, cursor.add_words(size));
            cursor = cursor.add_words(size);
        }
        let top = cursor;
        for w in 0..top.words_from(bottom) {
            let addr = bottom.add_words(w);
            let start = bottom.add_words(w / size * size);
            assert_eq!(bot.block_start::<MockVM>(addr), start);
        }
        assert!(bot.verify::<MockVM>(top).is_ok());
        assert!(WORDS_IN_CARD % size != 0);
    }
}
