//! Two-slot pairing buffer for rendezvous mode.

use std::fmt;

/// One of the two relay ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::A => "A",
            Side::B => "B",
        })
    }
}

/// Collects one item from each side, strictly alternating A, B, A, B.
///
/// Offering the side that is not expected is refused, so pairs always
/// form in arrival order and an early B can never be matched with a later
/// A.
#[derive(Debug)]
pub struct RelayPairSlot<T> {
    first: Option<T>,
}

impl<T> Default for RelayPairSlot<T> {
    fn default() -> Self {
        Self { first: None }
    }
}

impl<T> RelayPairSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The side the next item must come from.
    pub fn expected(&self) -> Side {
        if self.first.is_some() {
            Side::B
        } else {
            Side::A
        }
    }

    /// The A item waiting for its partner, if any.
    pub fn waiting(&self) -> Option<&T> {
        self.first.as_ref()
    }

    /// Offers an item from `side`.
    ///
    /// Returns the completed `(a, b)` pair once both slots are filled, after
    /// which the slot is empty again. An item from the wrong side is handed
    /// back untouched.
    pub fn offer(&mut self, side: Side, item: T) -> Result<Option<(T, T)>, T> {
        if side != self.expected() {
            return Err(item);
        }
        match self.first.take() {
            None => {
                self.first = Some(item);
                Ok(None)
            }
            Some(first) => Ok(Some((first, item))),
        }
    }

    /// Drops a waiting A item.
    pub fn clear(&mut self) -> Option<T> {
        self.first.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_in_arrival_order() {
        let mut slot = RelayPairSlot::new();
        let mut pairs = Vec::new();
        for (a, b) in [("a1", "b1"), ("a2", "b2"), ("a3", "b3")] {
            assert_eq!(slot.offer(Side::A, a), Ok(None));
            assert_eq!(slot.waiting(), Some(&a));
            pairs.push(slot.offer(Side::B, b).unwrap().unwrap());
            assert!(slot.waiting().is_none());
        }
        assert_eq!(pairs, [("a1", "b1"), ("a2", "b2"), ("a3", "b3")]);
    }

    #[test]
    fn refuses_out_of_turn() {
        let mut slot = RelayPairSlot::new();
        assert_eq!(slot.expected(), Side::A);
        assert_eq!(slot.offer(Side::B, 1), Err(1));

        assert_eq!(slot.offer(Side::A, 2), Ok(None));
        assert_eq!(slot.expected(), Side::B);
        assert_eq!(slot.offer(Side::A, 3), Err(3));
        assert_eq!(slot.offer(Side::B, 4), Ok(Some((2, 4))));
        assert_eq!(slot.expected(), Side::A);
    }

    #[test]
    fn clear_resets_the_round() {
        let mut slot = RelayPairSlot::new();
        slot.offer(Side::A, 'x').unwrap();
        assert_eq!(slot.clear(), Some('x'));
        assert_eq!(slot.expected(), Side::A);
    }

    #[test]
    fn sides() {
        assert_eq!(Side::A.other(), Side::B);
        assert_eq!(Side::B.other().index(), 0);
        assert_eq!(Side::B.to_string(), "B");
    }
}
