//! Fixed-capacity pools
//!
//! Every container here reserves its memory once, at construction, and never
//! grows afterwards. Running out is reported to the caller instead of falling
//! back to the heap, so the containers are safe to touch from interrupt
//! context inside a critical section.

use std::collections::VecDeque;

/// Slots addressed by index, handed out from a free list
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> SlotPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            // Pop order hands out slot 0 first
            free: (0..capacity).rev().collect(),
        }
    }

    /// Store `value`, returning its slot, or hand it back if the pool is full
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(value);
                Ok(slot)
            }
            None => Err(value),
        }
    }

    /// Take the value out of `slot` and free the slot
    pub fn remove(&mut self, slot: usize) -> Option<T> {
        let value = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        Some(value)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

/// Stack of preallocated owned items
#[derive(Debug)]
pub struct FreeList<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> FreeList<T> {
    /// A free list initially holding `items`
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self { items, capacity }
    }

    pub fn take(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Return an item; an item beyond capacity is handed back
    pub fn give(&mut self, item: T) -> Result<(), T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push(item);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.items.len()
    }
}

/// Bounded FIFO
#[derive(Debug)]
pub struct BoundedFifo<T> {
    queue: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedFifo<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, or hand `value` back if full
    pub fn push_back(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.queue.push_back(value);
        Ok(())
    }

    /// Insert at the head, or hand `value` back if full
    pub fn push_front(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.queue.push_front(value);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.queue.pop_front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_pool() {
        let mut pool = SlotPool::new(2);
        assert_eq!(pool.available(), 2);

        let a = pool.insert("a").unwrap();
        let b = pool.insert("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.insert("c"), Err("c"));
        assert_eq!(pool.get(a), Some(&"a"));

        assert_eq!(pool.remove(a), Some("a"));
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.available(), 1);

        // The freed slot is reused
        assert_eq!(pool.insert("d"), Ok(a));
        assert_eq!(pool.remove(b), Some("b"));
        assert_eq!(pool.remove(99), None);
    }

    #[test]
    fn test_free_list() {
        let mut list = FreeList::new(vec![1, 2, 3]);
        assert_eq!(list.capacity(), 3);

        let x = list.take().unwrap();
        assert_eq!(list.available(), 2);
        assert!(list.give(x).is_ok());
        assert_eq!(list.give(4), Err(4));
        assert_eq!(list.available(), 3);
    }

    #[test]
    fn test_bounded_fifo() {
        let mut fifo = BoundedFifo::new(3);
        fifo.push_back(1).unwrap();
        fifo.push_back(2).unwrap();
        fifo.push_front(0).unwrap();
        assert!(fifo.is_full());
        assert_eq!(fifo.push_back(3), Err(3));
        assert_eq!(fifo.push_front(3), Err(3));

        assert_eq!(fifo.pop_front(), Some(0));
        assert_eq!(fifo.drain().collect::<Vec<_>>(), vec![1, 2]);
        assert!(fifo.is_empty());
        assert_eq!(fifo.capacity(), 3);
    }
}
