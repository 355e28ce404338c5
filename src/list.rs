use std::{marker::PhantomData, mem, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// A list node living inside the memory it describes.
///
/// Every structure the memory manager keeps track of (free blocks, slices,
/// OS chunks and static blocks) is threaded through the managed memory itself,
/// so a node is simply written over the first bytes of the span:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        | -> Node<T>
/// |        data         |        |
/// +---------------------+ <------+
/// |   rest of the span  |
/// |         ...         |
/// +---------------------+
/// ```
///
/// Free blocks use `Node<()>` so they only cost one machine word.
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Size in bytes a `Node<T>` occupies at the start of a span.
pub(crate) const fn node_size<T>() -> usize {
    mem::size_of::<Node<T>>()
}

/// Singly linked LIFO list of nodes written into managed memory.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Iter<'a, T> {
    current: Link<Node<T>>,
    remaining: usize,
    marker: PhantomData<&'a T>,
}

// The list only stores pointers into memory owned by whoever owns the list.
unsafe impl<T: Send> Send for List<T> {}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes a new node to the front of the list.
    ///
    /// It is very important for us that, because we are the actual memory
    /// allocator, this method can not make allocations itself. Therefor,
    /// it has to receive the `addr` where this node has to be written.
    ///
    /// **SAFETY**: Caller (we, as the allocator) must guarantee that `addr` is
    /// valid for writes of `Node<T>`, aligned for it, and not used by anything
    /// else while the node is on the list.
    pub unsafe fn push(&mut self, data: T, addr: NonNull<u8>) -> NonNull<Node<T>> {
        let node = addr.cast::<Node<T>>();

        unsafe {
            node.as_ptr().write(Node {
                next: self.head,
                data,
            });
        }

        self.head = Some(node);
        self.len += 1;

        node
    }

    /// Detaches the first node of the list.
    pub fn pop(&mut self) -> Link<Node<T>> {
        let node = self.head?;

        // SAFETY: nodes are only linked through `push`, whose contract keeps
        // them valid until they are detached.
        self.head = unsafe { node.as_ref().next };
        self.len -= 1;

        Some(node)
    }

    /// Detaches the first node whose data matches `pred`.
    pub fn remove_first<F>(&mut self, mut pred: F) -> Link<Node<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let mut prev: Link<Node<T>> = None;
        let mut current = self.head;

        while let Some(mut node) = current {
            unsafe {
                if pred(&node.as_ref().data) {
                    let next = node.as_ref().next;
                    match prev {
                        Some(mut prev) => prev.as_mut().next = next,
                        None => self.head = next,
                    }
                    node.as_mut().next = None;
                    self.len -= 1;

                    return Some(node);
                }

                prev = Some(node);
                current = node.as_ref().next;
            }
        }

        None
    }

    /// Forgets every node. The memory they live in is not touched.
    pub fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
            self.remaining -= 1;

            Some(&(*node.as_ptr()).data)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
