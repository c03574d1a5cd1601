//! Tri-color mark bits plus a generational age, packed into one byte per object.
//!
//! Bit layout (mirrors the white/gray/black scheme used by Lua's own collector,
//! generalized with an extra age field for the generational mode):
//!
//! ```text
//! bit 0: WHITE0
//! bit 1: WHITE1
//! bit 2: BLACK
//! bit 3: FINALIZED   (has a pending or already-run __gc finalizer)
//! bit 4: SEPARATED    (queued on the to-be-finalized list)
//! bits 5-7: AGE (0..=7), only meaningful when generational-gc is active
//! ```
//!
//! An object with neither WHITE nor BLACK set is gray: reachable, not yet scanned.
//! Two white bits let the collector flip "current white" every full cycle without
//! a separate sweep pass to reset marks up front.

const WHITE0: u8 = 1 << 0;
const WHITE1: u8 = 1 << 1;
const BLACK: u8 = 1 << 2;
const FINALIZED: u8 = 1 << 3;
const SEPARATED: u8 = 1 << 4;
const WHITE_BITS: u8 = WHITE0 | WHITE1;
const AGE_SHIFT: u8 = 5;
const AGE_MASK: u8 = 0b111 << AGE_SHIFT;

/// Object age in the generational collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Age {
    New,
    Survival,
    Old,
    OldStart,
    Touched1,
    Touched2,
}

impl Age {
    const fn to_bits(self) -> u8 {
        match self {
            Age::New => 0,
            Age::Survival => 1,
            Age::Old => 2,
            Age::OldStart => 3,
            Age::Touched1 => 4,
            Age::Touched2 => 5,
        }
    }

    const fn from_bits(bits: u8) -> Age {
        match bits {
            0 => Age::New,
            1 => Age::Survival,
            2 => Age::Old,
            3 => Age::OldStart,
            4 => Age::Touched1,
            _ => Age::Touched2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GcHeader(u8);

impl GcHeader {
    /// A freshly allocated object: white (the collector's "other" white, so a
    /// cycle in progress doesn't sweep it before it's ever been reached) and new.
    #[inline]
    pub fn new(current_white: bool) -> Self {
        let white = if current_white { WHITE0 } else { WHITE1 };
        GcHeader(white)
    }

    #[inline]
    pub fn is_white(&self) -> bool {
        self.0 & WHITE_BITS != 0
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        self.0 & BLACK != 0
    }

    #[inline]
    pub fn is_gray(&self) -> bool {
        self.0 & (WHITE_BITS | BLACK) == 0
    }

    #[inline]
    pub fn is_white_of(&self, white: u8) -> bool {
        self.0 & white != 0
    }

    #[inline]
    pub fn set_gray(&mut self) {
        self.0 &= !(WHITE_BITS | BLACK);
    }

    #[inline]
    pub fn set_black(&mut self) {
        self.0 = (self.0 & !WHITE_BITS) | BLACK;
    }

    #[inline]
    pub fn set_white(&mut self, current_white: bool) {
        let white = if current_white { WHITE0 } else { WHITE1 };
        self.0 = (self.0 & !(WHITE_BITS | BLACK)) | white;
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.0 & FINALIZED != 0
    }

    #[inline]
    pub fn set_finalized(&mut self) {
        self.0 |= FINALIZED;
    }

    #[inline]
    pub fn is_separated(&self) -> bool {
        self.0 & SEPARATED != 0
    }

    #[inline]
    pub fn set_separated(&mut self) {
        self.0 |= SEPARATED;
    }

    #[inline]
    pub fn clear_separated(&mut self) {
        self.0 &= !SEPARATED;
    }

    #[inline]
    pub fn age(&self) -> Age {
        Age::from_bits((self.0 & AGE_MASK) >> AGE_SHIFT)
    }

    #[inline]
    pub fn set_age(&mut self, age: Age) {
        self.0 = (self.0 & !AGE_MASK) | (age.to_bits() << AGE_SHIFT);
    }

    /// Both current-cycle white constants, used by callers that only have
    /// "the collector's current white" and need to test membership generically.
    #[inline]
    pub const fn white0() -> u8 {
        WHITE0
    }

    #[inline]
    pub const fn white1() -> u8 {
        WHITE1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_is_white_and_new() {
        let h = GcHeader::new(true);
        assert!(h.is_white());
        assert!(!h.is_black());
        assert_eq!(h.age(), Age::New);
    }

    #[test]
    fn color_transitions() {
        let mut h = GcHeader::new(true);
        h.set_gray();
        assert!(h.is_gray());
        h.set_black();
        assert!(h.is_black());
        assert!(!h.is_white());
        h.set_white(false);
        assert!(h.is_white());
        assert!(!h.is_black());
    }

    #[test]
    fn age_roundtrips_without_disturbing_color() {
        let mut h = GcHeader::new(true);
        h.set_black();
        h.set_age(Age::Touched2);
        assert!(h.is_black());
        assert_eq!(h.age(), Age::Touched2);
    }

    #[test]
    fn finalized_and_separated_are_independent_bits() {
        let mut h = GcHeader::new(true);
        h.set_finalized();
        h.set_separated();
        assert!(h.is_finalized());
        assert!(h.is_separated());
        assert!(h.is_white());
    }
}
