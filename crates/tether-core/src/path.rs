use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::BridgeError;

/// Positional address of a node: one child index per tree level, starting
/// below the document container (the empty path).
///
/// Paths are only meaningful within one render/diff cycle. Anything that
/// must survive a re-render addresses nodes by [`crate::ElementId`] instead.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path(Vec<u32>);

impl Path {
    /// The document container.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_indices(indices: impl Into<Vec<u32>>) -> Self {
        Self(indices.into())
    }

    pub fn child(&self, index: u32) -> Self {
        let mut next = self.0.clone();
        next.push(index);
        Self(next)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Index of the addressed node within its parent.
    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// `prefix ++ self`.
    pub fn prefixed(&self, prefix: &Path) -> Self {
        let mut joined = prefix.0.clone();
        joined.extend_from_slice(&self.0);
        Self(joined)
    }

    /// The part of `self` below `prefix`, if `prefix` is an ancestor-or-self.
    pub fn relative_to(&self, prefix: &Path) -> Option<Self> {
        if self.starts_with(prefix) {
            Some(Self(self.0[prefix.0.len()..].to_vec()))
        } else {
            None
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("_")?;
            }
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        s.split('_')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| BridgeError::protocol(format!("malformed path: {s:?}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_form_joins_levels() {
        let path = Path::from_indices(vec![1, 3, 1, 1]);
        assert_eq!(path.to_string(), "1_3_1_1");
        assert_eq!(Path::root().to_string(), "");
    }

    #[test]
    fn parses_textual_form() {
        let path: Path = "1_3_1_1".parse().unwrap();
        assert_eq!(path.indices(), &[1, 3, 1, 1]);
        assert_eq!("".parse::<Path>().unwrap(), Path::root());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!("1__2".parse::<Path>().is_err());
        assert!("a_1".parse::<Path>().is_err());
        assert!("-1".parse::<Path>().is_err());
    }

    #[test]
    fn child_and_parent() {
        let p = Path::root().child(0).child(2);
        assert_eq!(p.indices(), &[0, 2]);
        assert_eq!(p.last(), Some(2));
        assert_eq!(p.parent(), Some(Path::from_indices(vec![0])));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn relative_and_prefixed() {
        let anchor = Path::from_indices(vec![0, 1]);
        let target = Path::from_indices(vec![0, 1, 4, 2]);
        let rel = target.relative_to(&anchor).unwrap();
        assert_eq!(rel.indices(), &[4, 2]);
        assert_eq!(rel.prefixed(&anchor), target);
        assert!(anchor.relative_to(&target).is_none());
    }
}
