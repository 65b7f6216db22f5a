//! Storage behind a series: disabled, unbounded, or a fixed-capacity ring.

/// Retained bars, oldest first.
#[derive(Debug, Clone)]
pub(crate) enum Window<B> {
    Disabled,
    Unbounded(Vec<B>),
    /// Ring of `capacity` slots. Slots are filled lazily; once full, `head`
    /// is the oldest slot and the next one to be overwritten. `evicted`
    /// counts every bar overwritten so far.
    Bounded {
        slots: Vec<B>,
        capacity: usize,
        head: usize,
        evicted: u64,
    },
}

/// What an append did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Appended {
    Grew,
    Evicted,
}

impl<B: Clone> Window<B> {
    /// `None` ⇒ unbounded, `<= 0` ⇒ disabled, otherwise a ring of that size.
    pub(crate) fn with_max_size(max_size: Option<i64>) -> Self {
        match max_size {
            None => Window::Unbounded(Vec::new()),
            Some(n) if n <= 0 => Window::Disabled,
            Some(n) => Window::Bounded {
                slots: Vec::new(),
                capacity: usize::try_from(n).unwrap_or(usize::MAX),
                head: 0,
                evicted: 0,
            },
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        matches!(self, Window::Disabled)
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        match self {
            Window::Disabled => Some(0),
            Window::Unbounded(_) => None,
            Window::Bounded { capacity, .. } => Some(*capacity),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        match self {
            Window::Disabled => 0,
            Window::Unbounded(bars) => bars.len(),
            Window::Bounded { slots, .. } => slots.len(),
        }
    }

    /// Sequence number of the bar at position 0: how many bars were appended
    /// before it. `sequence - first_sequence()` is a bar's current position.
    #[inline]
    pub(crate) fn first_sequence(&self) -> u64 {
        match self {
            Window::Bounded { evicted, .. } => *evicted,
            _ => 0,
        }
    }

    /// Bar at `position`, counted from the oldest retained bar.
    #[inline]
    pub(crate) fn get(&self, position: usize) -> Option<&B> {
        match self {
            Window::Disabled => None,
            Window::Unbounded(bars) => bars.get(position),
            Window::Bounded { slots, head, .. } => {
                if position >= slots.len() {
                    return None;
                }
                slots.get((head + position) % slots.len())
            }
        }
    }

    pub(crate) fn last(&self) -> Option<&B> {
        match self.len() {
            0 => None,
            n => self.get(n - 1),
        }
    }

    /// Overwrite the newest bar. No-op on an empty window.
    pub(crate) fn replace_last(&mut self, bar: B) {
        match self {
            Window::Disabled => {}
            Window::Unbounded(bars) => {
                if let Some(last) = bars.last_mut() {
                    *last = bar;
                }
            }
            Window::Bounded { slots, head, .. } => {
                if slots.is_empty() {
                    return;
                }
                let idx = (*head + slots.len() - 1) % slots.len();
                slots[idx] = bar;
            }
        }
    }

    pub(crate) fn push(&mut self, bar: B) -> Appended {
        match self {
            Window::Disabled => Appended::Grew,
            Window::Unbounded(bars) => {
                bars.push(bar);
                Appended::Grew
            }
            Window::Bounded {
                slots,
                capacity,
                head,
                evicted,
            } => {
                if slots.len() < *capacity {
                    slots.push(bar);
                    Appended::Grew
                } else {
                    slots[*head] = bar;
                    *head = (*head + 1) % *capacity;
                    *evicted += 1;
                    Appended::Evicted
                }
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &B> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Oldest-first copy of the retained bars.
    pub(crate) fn to_vec(&self) -> Vec<B> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_size_selects_mode() {
        assert!(Window::<u32>::with_max_size(Some(0)).is_disabled());
        assert!(Window::<u32>::with_max_size(Some(-5)).is_disabled());
        assert_eq!(Window::<u32>::with_max_size(None).capacity(), None);
        assert_eq!(Window::<u32>::with_max_size(Some(3)).capacity(), Some(3));
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut w = Window::with_max_size(Some(3));
        assert_eq!(w.push(1), Appended::Grew);
        assert_eq!(w.push(2), Appended::Grew);
        assert_eq!(w.push(3), Appended::Grew);
        assert_eq!(w.push(4), Appended::Evicted);
        assert_eq!(w.push(5), Appended::Evicted);
        assert_eq!(w.to_vec(), vec![3, 4, 5]);
        assert_eq!(w.get(0), Some(&3));
        assert_eq!(w.last(), Some(&5));
        assert_eq!(w.get(3), None);
    }

    #[test]
    fn first_sequence_counts_evictions() {
        let mut w = Window::with_max_size(Some(3));
        for v in 0..3 {
            w.push(v);
        }
        assert_eq!(w.first_sequence(), 0);
        w.push(3);
        w.push(4);
        assert_eq!(w.first_sequence(), 2);
        w.replace_last(40);
        assert_eq!(w.first_sequence(), 2);

        let mut unbounded = Window::with_max_size(None);
        unbounded.push(1);
        assert_eq!(unbounded.first_sequence(), 0);
    }

    #[test]
    fn replace_last_after_wrap() {
        let mut w = Window::with_max_size(Some(2));
        for v in 1..=5 {
            w.push(v);
        }
        w.replace_last(50);
        assert_eq!(w.to_vec(), vec![4, 50]);
    }

    #[test]
    fn disabled_stores_nothing() {
        let mut w = Window::with_max_size(Some(0));
        w.push(1);
        w.replace_last(2);
        assert_eq!(w.len(), 0);
        assert!(w.last().is_none());
    }

    #[test]
    fn unbounded_grows() {
        let mut w = Window::with_max_size(None);
        for v in 0..100 {
            assert_eq!(w.push(v), Appended::Grew);
        }
        assert_eq!(w.len(), 100);
        assert_eq!(w.get(99), Some(&99));
    }
}
