//! Rejection of over-deep selection trees.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Prefix of introspection root fields.
const INTROSPECTION_PREFIX: &str = "__";

/// A node in a client selection tree.
///
/// A node with children is an object-typed expansion; a node without
/// children is a scalar field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionNode {
    /// Field name.
    pub name: String,
    /// Nested selections.
    #[serde(default)]
    pub children: Vec<SelectionNode>,
}

impl SelectionNode {
    /// Creates a scalar field.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Creates an object expansion.
    pub fn object(name: impl Into<String>, children: Vec<SelectionNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Nesting depth: object expansions count one level each, scalars count zero.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 0)];
        while let Some((node, above)) = pending.pop() {
            if node.children.is_empty() {
                deepest = deepest.max(above);
            } else {
                pending.extend(node.children.iter().map(|child| (child, above + 1)));
            }
        }
        deepest
    }
}

/// Checks selection trees against a configured maximum depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthGuard {
    max_depth: Option<usize>,
    ignore_introspection: bool,
}

impl Default for DepthGuard {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DepthGuard {
    /// Creates a guard. `None` disables the check.
    #[must_use]
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            max_depth,
            ignore_introspection: true,
        }
    }

    /// Sets whether `__`-prefixed root selections are exempt.
    #[must_use]
    pub fn with_ignore_introspection(mut self, ignore: bool) -> Self {
        self.ignore_introspection = ignore;
        self
    }

    /// The configured maximum, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Validates the root selections of one request, returning the deepest
    /// depth found among the checked roots.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DepthExceeded`] for the first root whose
    /// depth is above the maximum.
    ///
    /// # Examples
    ///
    /// ```
    /// use engine::query::{DepthGuard, SelectionNode};
    ///
    /// let selection = vec![SelectionNode::object(
    ///     "sales",
    ///     vec![
    ///         SelectionNode::field("id"),
    ///         SelectionNode::object("customer", vec![SelectionNode::field("name")]),
    ///     ],
    /// )];
    ///
    /// assert_eq!(DepthGuard::new(Some(2)).check(&selection).unwrap(), 2);
    /// assert!(DepthGuard::new(Some(1)).check(&selection).is_err());
    /// ```
    pub fn check(&self, roots: &[SelectionNode]) -> Result<usize, ValidationError> {
        let mut deepest = 0;
        for root in roots {
            if self.ignore_introspection && root.name.starts_with(INTROSPECTION_PREFIX) {
                continue;
            }
            let depth = root.depth();
            if let Some(allowed) = self.max_depth {
                if depth > allowed {
                    tracing::debug!(root = %root.name, depth, allowed, "Selection rejected by depth guard");
                    return Err(ValidationError::DepthExceeded {
                        actual: depth,
                        allowed,
                    });
                }
            }
            deepest = deepest.max(depth);
        }
        Ok(deepest)
    }
}
