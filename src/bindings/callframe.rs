//! Call frames: the argument/return buffer handed to a native method call.
//!
//! A frame has a fixed number of argument slots, each holding one encoded
//! value (1 to 3 words), and a single return slot of 0 to 3 words. The frame
//! never calls into native code; it only owns the buffer. Storage goes back
//! to its pool when the frame is dropped.

use crate::bindings::codec::{DecodeContext, FromWire, ToWire};
use crate::bindings::frame_pool::FramePool;
use crate::bindings::handle::{Word, MAX_VALUE_WORDS};
use crate::bindings::lifetime::Lifetime;
use crate::core::error::{BindingError, BindingResult};
use std::marker::PhantomData;

/// Upper bound on the argument count of any call site.
pub const MAX_FRAME_ARGS: usize = 16;

const ARG_WORDS: usize = MAX_FRAME_ARGS * MAX_VALUE_WORDS;

/// Backing buffer of a frame, recycled through [`FramePool`].
pub struct FrameStorage {
    args: [Word; ARG_WORDS],
    spans: [(u8, u8); MAX_FRAME_ARGS],
    ret: [Word; MAX_VALUE_WORDS],
}

impl FrameStorage {
    pub(crate) fn boxed() -> Box<Self> {
        Box::new(Self {
            args: [0; ARG_WORDS],
            spans: [(0, 0); MAX_FRAME_ARGS],
            ret: [0; MAX_VALUE_WORDS],
        })
    }

    pub(crate) fn reset(&mut self) {
        self.args = [0; ARG_WORDS];
        self.spans = [(0, 0); MAX_FRAME_ARGS];
        self.ret = [0; MAX_VALUE_WORDS];
    }
}

/// Encoded arguments, one word slice per argument, in declaration order.
#[derive(Clone, Copy)]
pub struct FrameArgs<'a> {
    slots: [&'a [Word]; MAX_FRAME_ARGS],
    len: usize,
}

impl<'a> FrameArgs<'a> {
    pub fn as_slice(&self) -> &[&'a [Word]] {
        &self.slots[..self.len]
    }

    pub fn get(&self, index: usize) -> Option<&'a [Word]> {
        self.as_slice().get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// An argument/return buffer for one native call.
pub struct CallFrame<'p> {
    storage: Option<Box<FrameStorage>>,
    pool: Option<&'p FramePool>,
    capacity: usize,
    len: usize,
    used: usize,
    ret_width: Option<usize>,
}

impl CallFrame<'static> {
    /// Allocates an unpooled frame with `capacity` argument slots.
    pub fn new(capacity: usize) -> BindingResult<Self> {
        Self::check_capacity(capacity)?;
        Ok(Self::with_storage(FrameStorage::boxed(), capacity, None))
    }
}

impl<'p> CallFrame<'p> {
    pub(crate) fn check_capacity(capacity: usize) -> BindingResult<()> {
        if capacity > MAX_FRAME_ARGS {
            return Err(BindingError::FrameCapacity {
                requested: capacity,
                max: MAX_FRAME_ARGS,
            });
        }
        Ok(())
    }

    pub(crate) fn with_storage(
        storage: Box<FrameStorage>,
        capacity: usize,
        pool: Option<&'p FramePool>,
    ) -> Self {
        Self {
            storage: Some(storage),
            pool,
            capacity,
            len: 0,
            used: 0,
            ret_width: None,
        }
    }

    fn storage(&self) -> &FrameStorage {
        match self.storage.as_deref() {
            Some(storage) => storage,
            None => unreachable!("frame storage is only taken on drop"),
        }
    }

    fn storage_mut(&mut self) -> &mut FrameStorage {
        match self.storage.as_deref_mut() {
            Some(storage) => storage,
            None => unreachable!("frame storage is only taken on drop"),
        }
    }

    /// Appends one already-encoded argument.
    pub fn push_words(&mut self, words: &[Word]) -> BindingResult<usize> {
        if self.len >= self.capacity {
            return Err(BindingError::FrameOverflow {
                capacity: self.capacity,
            });
        }
        if words.is_empty() || words.len() > MAX_VALUE_WORDS {
            return Err(BindingError::ReturnSlot(format!(
                "argument width {} is outside 1..={}",
                words.len(),
                MAX_VALUE_WORDS
            )));
        }

        let index = self.len;
        let start = self.used;
        let end = start + words.len();
        let storage = self.storage_mut();
        storage.args[start..end].copy_from_slice(words);
        storage.spans[index] = (start as u8, words.len() as u8);
        self.used = end;
        self.len += 1;
        Ok(index)
    }

    /// Encodes `value` into the next argument slot.
    pub fn arg<T: ToWire + ?Sized>(&mut self, value: &T, lifetime: &Lifetime) -> BindingResult<usize> {
        if self.len >= self.capacity {
            return Err(BindingError::FrameOverflow {
                capacity: self.capacity,
            });
        }
        let mut words = [0; MAX_VALUE_WORDS];
        value.encode(lifetime, &mut words[..T::WIDTH])?;
        self.push_words(&words[..T::WIDTH])
    }

    /// Reserves a return slot of `width` words.
    pub fn reserve_return(&mut self, width: usize) -> BindingResult<()> {
        if self.ret_width.is_some() {
            return Err(BindingError::ReturnSlot(
                "return slot already reserved".to_string(),
            ));
        }
        if width > MAX_VALUE_WORDS {
            return Err(BindingError::ReturnSlot(format!(
                "return width {width} exceeds {MAX_VALUE_WORDS} words"
            )));
        }
        self.ret_width = Some(width);
        Ok(())
    }

    /// Reserves a return slot sized for `R`.
    pub fn ret<R: FromWire>(&mut self) -> BindingResult<RetSlot<R>> {
        self.reserve_return(R::WIDTH)?;
        Ok(RetSlot {
            _marker: PhantomData,
        })
    }

    pub fn args(&self) -> FrameArgs<'_> {
        let storage = self.storage();
        let mut slots: [&[Word]; MAX_FRAME_ARGS] = [&[]; MAX_FRAME_ARGS];
        for (slot, &(start, width)) in slots.iter_mut().zip(&storage.spans[..self.len]) {
            let start = start as usize;
            *slot = &storage.args[start..start + width as usize];
        }
        FrameArgs {
            slots,
            len: self.len,
        }
    }

    pub fn ret_words(&self) -> &[Word] {
        let width = self.ret_width.unwrap_or(0);
        &self.storage().ret[..width]
    }

    pub fn ret_words_mut(&mut self) -> &mut [Word] {
        let width = self.ret_width.unwrap_or(0);
        &mut self.storage_mut().ret[..width]
    }

    /// Borrows the arguments and the return slot together for the native call.
    pub fn split(&mut self) -> (FrameArgs<'_>, &mut [Word]) {
        let len = self.len;
        let width = self.ret_width.unwrap_or(0);
        let storage = match self.storage.as_deref_mut() {
            Some(storage) => storage,
            None => unreachable!("frame storage is only taken on drop"),
        };
        let FrameStorage { args, spans, ret } = storage;

        let mut slots: [&[Word]; MAX_FRAME_ARGS] = [&[]; MAX_FRAME_ARGS];
        for (slot, &(start, span)) in slots.iter_mut().zip(&spans[..len]) {
            let start = start as usize;
            *slot = &args[start..start + span as usize];
        }
        (FrameArgs { slots, len }, &mut ret[..width])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Releases the frame now. Equivalent to dropping it.
    pub fn free(self) {}
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            if let Some(pool) = self.pool {
                pool.release(storage);
            }
        }
    }
}

/// Typed token for a reserved return slot.
pub struct RetSlot<R> {
    _marker: PhantomData<fn() -> R>,
}

impl<R: FromWire> RetSlot<R> {
    pub fn decode(self, frame: &CallFrame<'_>, cx: &DecodeContext<'_>) -> BindingResult<R> {
        R::decode(frame.ret_words(), cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_limit() {
        assert!(CallFrame::new(MAX_FRAME_ARGS).is_ok());
        assert!(matches!(
            CallFrame::new(MAX_FRAME_ARGS + 1),
            Err(BindingError::FrameCapacity { requested: 17, max: 16 })
        ));
    }

    #[test]
    fn test_args_in_declaration_order() {
        let mut frame = CallFrame::new(3).unwrap();
        frame.push_words(&[1]).unwrap();
        frame.push_words(&[2, 3]).unwrap();
        frame.push_words(&[4, 5, 6]).unwrap();

        let args = frame.args();
        assert_eq!(args.len(), 3);
        assert_eq!(args.get(0), Some(&[1][..]));
        assert_eq!(args.get(1), Some(&[2, 3][..]));
        assert_eq!(args.get(2), Some(&[4, 5, 6][..]));
        assert!(frame.is_full());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut frame = CallFrame::new(1).unwrap();
        frame.push_words(&[9]).unwrap();
        assert!(matches!(
            frame.push_words(&[10]),
            Err(BindingError::FrameOverflow { capacity: 1 })
        ));
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn test_return_slot() {
        let mut frame = CallFrame::new(0).unwrap();
        assert!(frame.ret_words().is_empty());
        frame.reserve_return(2).unwrap();
        assert!(frame.reserve_return(1).is_err());

        frame.ret_words_mut().copy_from_slice(&[11, 12]);
        assert_eq!(frame.ret_words(), &[11, 12]);

        let mut wide = CallFrame::new(0).unwrap();
        assert!(matches!(wide.reserve_return(4), Err(BindingError::ReturnSlot(_))));
    }

    #[test]
    fn test_split_borrows() {
        let mut frame = CallFrame::new(2).unwrap();
        frame.push_words(&[5]).unwrap();
        frame.reserve_return(1).unwrap();
        let (args, ret) = frame.split();
        ret[0] = args.get(0).unwrap()[0] * 2;
        assert_eq!(frame.ret_words(), &[10]);
    }
}
