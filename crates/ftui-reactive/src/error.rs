#![forbid(unsafe_code)]

//! Error type for the reactive runtime.
//!
//! Only one condition is recoverable by callers: touching a [`Computed`]
//! node after it was destroyed. Everything else (a compute function or a
//! listener that panics) unwinds out of the write that triggered it.
//!
//! [`Computed`]: crate::Computed

use thiserror::Error;

use crate::listeners::NodeId;

pub type Result<T> = std::result::Result<T, ReactiveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("illegal state: computed node {node} has been destroyed")]
    Destroyed { node: NodeId },
}

impl ReactiveError {
    #[must_use]
    pub fn destroyed(node: NodeId) -> Self {
        Self::Destroyed { node }
    }

    /// Id of the node the error refers to.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::Destroyed { node } => *node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_node() {
        let err = ReactiveError::destroyed(NodeId::new(7));
        assert_eq!(
            err.to_string(),
            "illegal state: computed node #7 has been destroyed"
        );
        assert_eq!(err.node(), NodeId::new(7));
    }
}
