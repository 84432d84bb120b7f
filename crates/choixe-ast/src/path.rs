//! Access paths into configuration trees.

use std::fmt;

/// One step of an access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A map key.
    Key(String),
    /// A sequence index.
    Index(usize),
}

/// A JSONPath-like location inside a configuration tree.
///
/// Compile and evaluation errors carry the access path of the offending node
/// so it can be found in the source document. The root renders as `$`, a map
/// key as `.key`, and a sequence index as `[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessPath(Vec<Segment>);

impl AccessPath {
    /// The path of the tree root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns this path extended with a map key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Self(segments)
    }

    /// Returns this path extended with a sequence index.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    /// The segments of the path, from the root down.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.0 {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AccessPath::root().to_string(), "$");
        assert_eq!(
            AccessPath::root()
                .key("training")
                .key("stages")
                .index(2)
                .key("lr")
                .to_string(),
            "$.training.stages[2].lr"
        );
    }
}
