//! Ready-priority bitmap resolved with count-leading-zeros.
//!
//! Bit *i* of the bitmap is set while priority *i* has at least one ready
//! task. Higher numbers mean higher priority, so the most significant set bit
//! is the next priority to run. Up to [`WORD_BITS`] levels fit in a single
//! word and need no summary; larger configurations use a master word whose
//! bit *w* is set iff slave word *w* is non-zero.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Machine word scanned with a single CLZ.
pub type ClzWord = u32;

/// Number of priority levels covered by one [`ClzWord`].
pub const WORD_BITS: usize = ClzWord::BITS as usize;

/// Largest number of levels a two-level bitmap can represent.
pub const MAX_LEVELS: usize = WORD_BITS * WORD_BITS;

/// Index of the most significant set bit, or `None` for an empty word.
#[inline]
pub fn highest_bit(word: ClzWord) -> Option<usize> {
    if word == 0 {
        None
    } else {
        Some(WORD_BITS - 1 - word.leading_zeros() as usize)
    }
}

/// Operations shared by the bitmap layouts.
///
/// All methods panic when the priority is out of range.
pub trait PrioritySet {
    /// Number of priority levels the set can hold.
    fn levels(&self) -> usize;

    fn contains(&self, prio: usize) -> bool;

    fn insert(&mut self, prio: usize);

    fn remove(&mut self, prio: usize);

    /// Highest priority present.
    fn highest(&self) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.highest().is_none()
    }
}

/// Bitmap for configurations with at most [`WORD_BITS`] levels. The master
/// lookup is skipped entirely.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleWordBitmap {
    word: ClzWord,
    levels: usize,
}

impl SingleWordBitmap {
    pub fn new(levels: usize) -> Self {
        assert!(levels <= WORD_BITS, "{levels} levels do not fit one word");
        Self { word: 0, levels }
    }

    pub fn word(&self) -> ClzWord {
        self.word
    }

    #[inline]
    fn assert_range(&self, prio: usize) {
        assert!(
            prio < self.levels,
            "priority {prio} outside bitmap of {} levels",
            self.levels
        );
    }
}

impl PrioritySet for SingleWordBitmap {
    fn levels(&self) -> usize {
        self.levels
    }

    fn contains(&self, prio: usize) -> bool {
        self.assert_range(prio);
        self.word & (1 << prio) != 0
    }

    fn insert(&mut self, prio: usize) {
        self.assert_range(prio);
        self.word |= 1 << prio;
    }

    fn remove(&mut self, prio: usize) {
        self.assert_range(prio);
        self.word &= !(1 << prio);
    }

    #[inline]
    fn highest(&self) -> Option<usize> {
        highest_bit(self.word)
    }
}

/// Master/slave bitmap.
#[derive(Clone, PartialEq, Eq)]
pub struct TwoLevelBitmap {
    // Invariant: bit `w` of `master` is set iff `slaves[w] != 0`.
    master: ClzWord,
    slaves: Vec<ClzWord>,
    levels: usize,
}

impl TwoLevelBitmap {
    pub fn new(levels: usize) -> Self {
        assert!(levels <= MAX_LEVELS, "{levels} levels exceed {MAX_LEVELS}");
        let words = levels.div_ceil(WORD_BITS).max(1);
        Self {
            master: 0,
            slaves: vec![0; words],
            levels,
        }
    }

    pub fn master_word(&self) -> ClzWord {
        self.master
    }

    pub fn slave_word(&self, index: usize) -> ClzWord {
        self.slaves[index]
    }

    #[inline]
    fn assert_range(&self, prio: usize) {
        assert!(
            prio < self.levels,
            "priority {prio} outside bitmap of {} levels",
            self.levels
        );
    }
}

impl PrioritySet for TwoLevelBitmap {
    fn levels(&self) -> usize {
        self.levels
    }

    fn contains(&self, prio: usize) -> bool {
        self.assert_range(prio);
        self.slaves[prio / WORD_BITS] & (1 << (prio % WORD_BITS)) != 0
    }

    fn insert(&mut self, prio: usize) {
        self.assert_range(prio);
        let index = prio / WORD_BITS;
        self.slaves[index] |= 1 << (prio % WORD_BITS);
        self.master |= 1 << index;
    }

    fn remove(&mut self, prio: usize) {
        self.assert_range(prio);
        let index = prio / WORD_BITS;
        let slave = &mut self.slaves[index];
        *slave &= !(1 << (prio % WORD_BITS));
        if *slave == 0 {
            self.master &= !(1 << index);
        }
    }

    #[inline]
    fn highest(&self) -> Option<usize> {
        let index = highest_bit(self.master)?;
        let bit = highest_bit(self.slaves[index]);
        debug_assert!(bit.is_some(), "master bit {index} set over an empty slave");
        bit.map(|bit| index * WORD_BITS + bit)
    }
}

/// Bitmap layout chosen from the number of configured priority levels.
#[derive(Clone, PartialEq, Eq)]
pub enum PriorityBitmap {
    Single(SingleWordBitmap),
    TwoLevel(TwoLevelBitmap),
}

impl PriorityBitmap {
    /// Picks the single-word layout whenever `levels` fits one word.
    pub fn for_levels(levels: usize) -> Self {
        if levels <= WORD_BITS {
            Self::Single(SingleWordBitmap::new(levels))
        } else {
            Self::TwoLevel(TwoLevelBitmap::new(levels))
        }
    }

    /// Forces the master/slave layout even for small configurations.
    pub fn two_level(levels: usize) -> Self {
        Self::TwoLevel(TwoLevelBitmap::new(levels))
    }

    pub fn is_single_word(&self) -> bool {
        matches!(self, Self::Single(_))
    }

    pub fn clear_all(&mut self) {
        let levels = self.levels();
        *self = if self.is_single_word() {
            Self::Single(SingleWordBitmap::new(levels))
        } else {
            Self::two_level(levels)
        };
    }

    /// Iterates the set priorities from highest to lowest.
    pub fn iter_desc(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.levels()).rev().filter(move |&prio| self.contains(prio))
    }
}

impl PrioritySet for PriorityBitmap {
    fn levels(&self) -> usize {
        match self {
            Self::Single(bitmap) => bitmap.levels(),
            Self::TwoLevel(bitmap) => bitmap.levels(),
        }
    }

    fn contains(&self, prio: usize) -> bool {
        match self {
            Self::Single(bitmap) => bitmap.contains(prio),
            Self::TwoLevel(bitmap) => bitmap.contains(prio),
        }
    }

    fn insert(&mut self, prio: usize) {
        match self {
            Self::Single(bitmap) => bitmap.insert(prio),
            Self::TwoLevel(bitmap) => bitmap.insert(prio),
        }
    }

    fn remove(&mut self, prio: usize) {
        match self {
            Self::Single(bitmap) => bitmap.remove(prio),
            Self::TwoLevel(bitmap) => bitmap.remove(prio),
        }
    }

    #[inline]
    fn highest(&self) -> Option<usize> {
        match self {
            Self::Single(bitmap) => bitmap.highest(),
            Self::TwoLevel(bitmap) => bitmap.highest(),
        }
    }
}

impl fmt::Debug for PriorityBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter_desc()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use quickcheck_macros::quickcheck;

    #[test]
    fn highest_bit_matches_clz() {
        assert_eq!(highest_bit(0), None);
        assert_eq!(highest_bit(1), Some(0));
        assert_eq!(highest_bit(0b1010), Some(3));
        assert_eq!(highest_bit(ClzWord::MAX), Some(WORD_BITS - 1));
    }

    #[test]
    fn layout_follows_level_count() {
        assert!(PriorityBitmap::for_levels(3).is_single_word());
        assert!(PriorityBitmap::for_levels(WORD_BITS).is_single_word());
        assert!(!PriorityBitmap::for_levels(WORD_BITS + 1).is_single_word());
    }

    #[test]
    fn master_bit_tracks_slave_word() {
        let mut bitmap = TwoLevelBitmap::new(100);
        bitmap.insert(70);
        bitmap.insert(65);
        assert_eq!(bitmap.master_word(), 1 << 2);
        assert_eq!(bitmap.highest(), Some(70));

        bitmap.remove(70);
        assert_eq!(bitmap.master_word(), 1 << 2);
        assert_eq!(bitmap.highest(), Some(65));

        bitmap.remove(65);
        assert_eq!(bitmap.master_word(), 0);
        assert_eq!(bitmap.slave_word(2), 0);
        assert_eq!(bitmap.highest(), None);
    }

    #[test]
    #[should_panic]
    fn out_of_range_priority_panics() {
        let mut bitmap = SingleWordBitmap::new(3);
        bitmap.insert(3);
    }

    /// Map random bytes to set/clear operations, comparing against a `BTreeSet`.
    fn check_against_reference(mut subject: PriorityBitmap, bytecode: &[u8]) {
        let levels = subject.levels();
        let mut reference = BTreeSet::new();
        for instr in bytecode.chunks_exact(2) {
            let prio = instr[1] as usize % levels;
            if instr[0] % 2 == 0 {
                subject.insert(prio);
                reference.insert(prio);
            } else {
                subject.remove(prio);
                reference.remove(&prio);
            }
            assert_eq!(subject.highest(), reference.iter().next_back().copied());
        }
        let set: Vec<usize> = subject.iter_desc().collect();
        let expected: Vec<usize> = reference.iter().rev().copied().collect();
        assert_eq!(set, expected);
    }

    #[quickcheck]
    fn single_word_matches_reference(bytecode: Vec<u8>) {
        check_against_reference(PriorityBitmap::for_levels(20), &bytecode);
    }

    #[quickcheck]
    fn two_level_matches_reference(bytecode: Vec<u8>) {
        check_against_reference(PriorityBitmap::for_levels(256), &bytecode);
    }

    #[quickcheck]
    fn forced_two_level_agrees_with_single_word(bytecode: Vec<u8>) {
        let mut single = PriorityBitmap::for_levels(WORD_BITS);
        let mut double = PriorityBitmap::two_level(WORD_BITS);
        for instr in bytecode.chunks_exact(2) {
            let prio = instr[1] as usize % WORD_BITS;
            if instr[0] % 2 == 0 {
                single.insert(prio);
                double.insert(prio);
            } else {
                single.remove(prio);
                double.remove(prio);
            }
            assert_eq!(single.highest(), double.highest());
        }
    }
}
