use serde::{Deserialize, Serialize};

/// An undirected bond between two atom indices, stored with `first < second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bond {
    first: usize,
    second: usize,
}

impl Bond {
    /// Creates a canonical bond, or `None` for a self-bond.
    pub fn new(i: usize, j: usize) -> Option<Self> {
        match i.cmp(&j) {
            std::cmp::Ordering::Less => Some(Self { first: i, second: j }),
            std::cmp::Ordering::Greater => Some(Self { first: j, second: i }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> usize {
        self.first
    }

    pub fn second(&self) -> usize {
        self.second
    }

    pub fn contains(&self, index: usize) -> bool {
        self.first == index || self.second == index
    }

    /// The partner of `index` in this bond, if `index` is one of its ends.
    pub fn partner(&self, index: usize) -> Option<usize> {
        if self.first == index {
            Some(self.second)
        } else if self.second == index {
            Some(self.first)
        } else {
            None
        }
    }
}
