//! # Pipeline values
//!
//! Everything that travels over a channel in the collector is one of these
//! three types. They are small, immutable and cheap to clone:
//!
//! - [`Location`] - a pair of coordinates, also the deduplication key.
//! - [`ShapeData`] - an opaque payload produced by a
//!   [`ShapeFetcher`](crate::ShapeFetcher).
//! - [`Shape`] - a location together with the data fetched for it.

use bytes::Bytes;
use core::fmt;

/// A coordinate pair identifying where a shape is fetched from.
///
/// Equality and hashing are structural, so two locations with the same
/// coordinates are the same in-flight entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for Location {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Opaque payload returned by a fetch.
///
/// The pipeline never looks inside; it only moves the bytes from the fetcher
/// to the consumer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShapeData(Bytes);

impl ShapeData {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for ShapeData {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// The unit emitted to the consumer: a location and its fetched data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape {
    location: Location,
    data: ShapeData,
}

impl Shape {
    pub const fn new(location: Location, data: ShapeData) -> Self {
        Self { location, data }
    }

    pub const fn location(&self) -> Location {
        self.location
    }

    pub const fn data(&self) -> &ShapeData {
        &self.data
    }

    pub fn into_parts(self) -> (Location, ShapeData) {
        (self.location, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn locations_compare_structurally() {
        let a = Location::new(1, 1);
        let b = Location::from((1, 1));
        let c = Location::new(1, 2);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn shape_keeps_its_parts() {
        let shape = Shape::new(Location::new(-3, 7), ShapeData::new(&b"square"[..]));
        assert_eq!(shape.location(), Location::new(-3, 7));
        assert_eq!(shape.data().as_bytes(), b"square");

        let (location, data) = shape.into_parts();
        assert_eq!(location.to_string(), "(-3, 7)");
        assert_eq!(data.len(), 6);
    }
}
