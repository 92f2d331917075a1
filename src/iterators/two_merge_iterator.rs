//! Merges exactly two iterators of the same key type, preferring the first
//! (`a`) on ties; used to overlay a transaction's local write set (`a`) over
//! the engine's MVCC-resolved view (`b`).

use crate::error::Result;

use super::StorageIterator;

pub struct TwoMergeIterator<A: StorageIterator, B: StorageIterator> {
    a: A,
    b: B,
    choose_a: bool,
}

impl<A, B> TwoMergeIterator<A, B>
where
    A: for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
    B: for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
{
    fn choose_a(a: &A, b: &B) -> bool {
        if !a.is_valid() {
            return false;
        }
        if !b.is_valid() {
            return true;
        }
        a.key() <= b.key()
    }

    /// Advances `b` past `a`'s current key when both agree on it, so `a`'s
    /// entry always wins without `b`'s shadowed copy reappearing later.
    fn skip_b(&mut self) -> Result<()> {
        if self.a.is_valid() && self.b.is_valid() && self.a.key() == self.b.key() {
            self.b.next()?;
        }
        Ok(())
    }

    pub fn create(a: A, b: B) -> Result<Self> {
        let mut iter = TwoMergeIterator {
            choose_a: false,
            a,
            b,
        };
        iter.skip_b()?;
        iter.choose_a = Self::choose_a(&iter.a, &iter.b);
        Ok(iter)
    }
}

impl<A, B> StorageIterator for TwoMergeIterator<A, B>
where
    A: for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
    B: for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
{
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        if self.choose_a {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.choose_a {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn is_valid(&self) -> bool {
        if self.choose_a {
            self.a.is_valid()
        } else {
            self.b.is_valid()
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.choose_a {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b()?;
        self.choose_a = Self::choose_a(&self.a, &self.b);
        Ok(())
    }

    fn number_of_iterators(&self) -> usize {
        self.a.number_of_iterators() + self.b.number_of_iterators()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecIter {
        items: Vec<(Vec<u8>, Vec<u8>)>,
        idx: usize,
    }

    impl VecIter {
        fn new(items: Vec<(&'static [u8], &'static [u8])>) -> Self {
            Self {
                items: items.into_iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect(),
                idx: 0,
            }
        }
    }

    impl StorageIterator for VecIter {
        type KeyType<'a> = &'a [u8];

        fn key(&self) -> &[u8] {
            &self.items[self.idx].0
        }

        fn value(&self) -> &[u8] {
            &self.items[self.idx].1
        }

        fn is_valid(&self) -> bool {
            self.idx < self.items.len()
        }

        fn next(&mut self) -> Result<()> {
            self.idx += 1;
            Ok(())
        }
    }

    #[test]
    fn a_wins_ties() {
        let a = VecIter::new(vec![(b"a", b"local")]);
        let b = VecIter::new(vec![(b"a", b"engine"), (b"b", b"engine")]);
        let mut iter = TwoMergeIterator::create(a, b).unwrap();
        assert_eq!(iter.key(), b"a");
        assert_eq!(iter.value(), b"local");
        iter.next().unwrap();
        assert_eq!(iter.key(), b"b");
        assert_eq!(iter.value(), b"engine");
        iter.next().unwrap();
        assert!(!iter.is_valid());
    }
}
