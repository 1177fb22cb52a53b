//! Append-only byte arena for variable-length draw-op payloads
//! (strings, point lists), per spec.md §4.1.
//!
//! Offsets returned by `allocate`/`store_*` are stable for the life of
//! the arena. Readers reinterpret bytes at a returned offset as the
//! target type; this is well-defined only because offsets are always
//! paired with a count/length recorded alongside them in a `DrawOp`,
//! never inferred from the bytes themselves.

use crate::geometry::Point;

const INITIAL_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
pub struct Arena {
    bytes: Vec<u8>,
}

impl Arena {
    pub fn new() -> Self {
        Self { bytes: Vec::with_capacity(INITIAL_CAPACITY) }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reserves and zero-fills `n` bytes, returning the offset of the
    /// first reserved byte.
    pub fn allocate(&mut self, n: usize) -> usize {
        let offset = self.bytes.len();
        self.bytes.resize(offset + n, 0);
        offset
    }

    /// Copies `data` into the arena, returning its offset.
    pub fn store_bytes(&mut self, data: &[u8]) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(data);
        offset
    }

    /// Appends `s`'s bytes followed by a trailing zero byte, returning
    /// the offset of the first byte (not the terminator).
    pub fn store_string(&mut self, s: &str) -> usize {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }

    /// Copies `pts` raw into the arena, returning the offset of the
    /// first point.
    pub fn store_points(&mut self, pts: &[Point]) -> usize {
        let offset = self.bytes.len();
        for p in pts {
            self.bytes.extend_from_slice(&p.x.to_ne_bytes());
            self.bytes.extend_from_slice(&p.y.to_ne_bytes());
        }
        offset
    }

    /// Reads back `len` bytes starting at `offset` terminated by a zero
    /// byte, as a `&str`. Panics if the bytes are not valid UTF-8 or the
    /// offset/length are out of bounds — callers only ever pass offsets
    /// they themselves recorded via `store_string`.
    pub fn get_string(&self, offset: usize, byte_len: usize) -> &str {
        std::str::from_utf8(&self.bytes[offset..offset + byte_len])
            .expect("arena string payload must be valid utf-8")
    }

    /// Reads back `count` points starting at `offset`.
    pub fn get_points(&self, offset: usize, count: usize) -> Vec<Point> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = offset;
        for _ in 0..count {
            let x = f32::from_ne_bytes(self.bytes[cursor..cursor + 4].try_into().unwrap());
            let y = f32::from_ne_bytes(self.bytes[cursor + 4..cursor + 8].try_into().unwrap());
            out.push(Point::new(x, y));
            cursor += 8;
        }
        out
    }

    /// Truncates the arena to zero length without shrinking capacity.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trips() {
        let mut arena = Arena::new();
        let offset = arena.store_string("hello");
        assert_eq!(arena.get_string(offset, "hello".len()), "hello");
    }

    #[test]
    fn points_round_trip_element_wise() {
        let mut arena = Arena::new();
        let pts = vec![Point::new(1.0, 2.0), Point::new(3.5, -4.5)];
        let offset = arena.store_points(&pts);
        assert_eq!(arena.get_points(offset, pts.len()), pts);
    }

    #[test]
    fn reset_truncates_without_losing_capacity() {
        let mut arena = Arena::new();
        arena.store_string("some bytes");
        let cap_before = arena.bytes.capacity();
        arena.reset();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.bytes.capacity(), cap_before);
    }
}
