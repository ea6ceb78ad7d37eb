use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-object change counter with alias/non-alias parity.
///
/// Even ticks mark ordinary (non-aliasing) updates. Odd ticks mark aliasing
/// updates, recorded when two independently created objects are found to
/// denote the same object and are merged.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tick(u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Returns `true` if this tick records an aliasing update.
    pub fn is_alias(&self) -> bool {
        self.0 % 2 == 1
    }

    /// The smallest odd tick strictly greater than `self`.
    pub fn increment_alias(&self) -> Tick {
        if self.is_alias() {
            Tick(self.0 + 2)
        } else {
            Tick(self.0 + 1)
        }
    }

    /// The smallest even tick strictly greater than `self`.
    pub fn increment_non_alias(&self) -> Tick {
        if self.is_alias() {
            Tick(self.0 + 1)
        } else {
            Tick(self.0 + 2)
        }
    }

    /// Next tick with the requested parity.
    pub fn increment(&self, alias: bool) -> Tick {
        if alias {
            self.increment_alias()
        } else {
            self.increment_non_alias()
        }
    }
}

impl fmt::Debug for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick({})", self.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical timestamp assigned by the remote authority.
///
/// Totally orders the change log of one store. Also used as the merge
/// boundary watermark for buffered remote changes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lts(u64);

impl Lts {
    pub const ZERO: Lts = Lts(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Lts {
        Lts(self.0 + 1)
    }
}

impl fmt::Debug for Lts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lts({})", self.0)
    }
}

impl fmt::Display for Lts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_non_alias() {
        assert!(!Tick::ZERO.is_alias());
        assert_eq!(Tick::ZERO.increment_alias(), Tick::new(1));
        assert_eq!(Tick::ZERO.increment_non_alias(), Tick::new(2));
    }

    #[test]
    fn parity_from_odd_start() {
        let t = Tick::new(5);
        assert_eq!(t.increment_alias(), Tick::new(7));
        assert_eq!(t.increment_non_alias(), Tick::new(6));
    }

    #[test]
    fn increment_dispatches_on_flag() {
        let t = Tick::new(4);
        assert_eq!(t.increment(true), Tick::new(5));
        assert_eq!(t.increment(false), Tick::new(6));
    }

    #[test]
    fn lts_ordering() {
        assert!(Lts::new(3) < Lts::new(4));
        assert_eq!(Lts::new(3).next(), Lts::new(4));
    }

    proptest! {
        #[test]
        fn alias_increment_is_odd_and_greater(start in 0u64..u64::MAX / 2) {
            let t = Tick::new(start);
            let next = t.increment_alias();
            prop_assert!(next.is_alias());
            prop_assert!(next > t);
            prop_assert!(next.get() - t.get() <= 2);
        }

        #[test]
        fn non_alias_increment_is_even_and_greater(start in 0u64..u64::MAX / 2) {
            let t = Tick::new(start);
            let next = t.increment_non_alias();
            prop_assert!(!next.is_alias());
            prop_assert!(next > t);
            prop_assert!(next.get() - t.get() <= 2);
        }
    }
}
