//! CacheSelectHint - which outputs of a job go to the private cache.
//!
//! A value is *private* when only the job that produced it (or a later item of
//! the same job) reads it, and *shared* when another job needs it. Shared
//! values go through the computation cache; private ones never leave the node.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::value::ValueSpecification;

/// Classifies every value specification as private or shared.
///
/// Two representations cover all four constructors:
/// - `PrivateOnly(set)`: values in `set` are private, everything else shared
/// - `SharedOnly(set)`: values in `set` are shared, everything else private
///
/// `all_shared()` is `PrivateOnly(∅)` and `all_private()` is `SharedOnly(∅)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "values")]
pub enum CacheSelectHint {
    PrivateOnly(HashSet<ValueSpecification>),
    SharedOnly(HashSet<ValueSpecification>),
}

impl CacheSelectHint {
    pub fn all_shared() -> Self {
        Self::PrivateOnly(HashSet::new())
    }

    pub fn all_private() -> Self {
        Self::SharedOnly(HashSet::new())
    }

    pub fn private_values(values: impl IntoIterator<Item = ValueSpecification>) -> Self {
        Self::PrivateOnly(values.into_iter().collect())
    }

    pub fn shared_values(values: impl IntoIterator<Item = ValueSpecification>) -> Self {
        Self::SharedOnly(values.into_iter().collect())
    }

    pub fn is_private_value(&self, value: &ValueSpecification) -> bool {
        match self {
            Self::PrivateOnly(private) => private.contains(value),
            Self::SharedOnly(shared) => !shared.contains(value),
        }
    }

    /// A hint in which `values` are shared and every other value keeps its
    /// current classification.
    pub fn with_shared<'a>(&self, values: impl IntoIterator<Item = &'a ValueSpecification>) -> Self {
        match self {
            Self::PrivateOnly(private) => {
                let mut private = private.clone();
                for value in values {
                    private.remove(value);
                }
                Self::PrivateOnly(private)
            }
            Self::SharedOnly(shared) => {
                let mut shared = shared.clone();
                shared.extend(values.into_iter().cloned());
                Self::SharedOnly(shared)
            }
        }
    }
}

impl Default for CacheSelectHint {
    fn default() -> Self {
        Self::all_shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::ComputationTarget;
    use rstest::rstest;

    fn spec(name: &str) -> ValueSpecification {
        ValueSpecification::new(name, ComputationTarget::primitive("t"), "f")
    }

    #[rstest]
    #[case(CacheSelectHint::all_shared(), "A", false)]
    #[case(CacheSelectHint::all_private(), "A", true)]
    #[case(CacheSelectHint::private_values([spec("A")]), "A", true)]
    #[case(CacheSelectHint::private_values([spec("A")]), "B", false)]
    #[case(CacheSelectHint::shared_values([spec("A")]), "A", false)]
    #[case(CacheSelectHint::shared_values([spec("A")]), "B", true)]
    fn classification_is_total(
        #[case] hint: CacheSelectHint,
        #[case] name: &str,
        #[case] private: bool,
    ) {
        assert_eq!(hint.is_private_value(&spec(name)), private);
    }

    #[rstest]
    #[case(CacheSelectHint::all_private())]
    #[case(CacheSelectHint::private_values([spec("A"), spec("B")]))]
    #[case(CacheSelectHint::shared_values([spec("C")]))]
    fn with_shared_only_demotes_named_values(#[case] hint: CacheSelectHint) {
        let a = spec("A");
        let b = spec("B");
        let c = spec("C");
        let before_b = hint.is_private_value(&b);
        let before_c = hint.is_private_value(&c);

        let adjusted = hint.with_shared([&a]);

        assert!(!adjusted.is_private_value(&a));
        assert_eq!(adjusted.is_private_value(&b), before_b);
        assert_eq!(adjusted.is_private_value(&c), before_c);
    }

    #[test]
    fn default_is_all_shared() {
        assert_eq!(CacheSelectHint::default(), CacheSelectHint::all_shared());
    }
}
