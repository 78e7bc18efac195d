//! Paths from a traversal root to a descendant.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use crate::value::Value;

/// One step from a value to one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Position in a list, tuple or set.
    Index(usize),
    /// Attribute of a record.
    Attr(Rc<str>),
    /// Key of a dict.
    Key(Value),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(index) => write!(f, "{index}"),
            Segment::Attr(name) => f.write_str(name),
            Segment::Key(Value::Str(key)) => f.write_str(key),
            Segment::Key(key) => write!(f, "{key}"),
        }
    }
}

/// A sequence of [`Segment`]s. The root is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The empty path.
    pub const fn root() -> Self {
        Path(Vec::new())
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend(self.0.iter().cloned());
        segments.push(segment);
        Path(segments)
    }

    /// Push a segment onto the path.
    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// The segments.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the root.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dot-joined rendering, the form patterns are matched against.
    ///
    /// Returns something like `layers.0.weights`; the root renders as the
    /// empty string.
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            // writing into a String cannot fail
            let _ = write!(out, "{segment}");
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}
