//! Reducer accumulator

/// A reducer's local accumulator.
///
/// `Empty` means nothing has been folded in yet, which is distinct from a
/// populated accumulator whose value happens to be an empty collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerContext<I> {
    Empty,
    Populated(I),
}

impl<I> Default for ReducerContext<I> {
    fn default() -> Self {
        ReducerContext::Empty
    }
}

impl<I> ReducerContext<I> {
    /// Fold one intermediate result in. The first item seeds the context
    /// without calling `reduce`.
    pub fn fold<F>(self, item: I, reduce: F) -> anyhow::Result<Self>
    where
        F: FnOnce(I, I) -> anyhow::Result<I>,
    {
        match self {
            ReducerContext::Empty => Ok(ReducerContext::Populated(item)),
            ReducerContext::Populated(context) => {
                reduce(context, item).map(ReducerContext::Populated)
            }
        }
    }

    pub fn is_populated(&self) -> bool {
        matches!(self, ReducerContext::Populated(_))
    }

    pub fn into_inner(self) -> Option<I> {
        match self {
            ReducerContext::Empty => None,
            ReducerContext::Populated(context) => Some(context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_item_seeds_without_reduce() {
        let context = ReducerContext::Empty
            .fold(5, |_, _| anyhow::bail!("must not be called"))
            .unwrap();
        assert_eq!(context, ReducerContext::Populated(5));
    }

    #[test]
    fn test_fold_accumulates() {
        let mut context = ReducerContext::Empty;
        for item in [1, 2, 3, 4] {
            context = context.fold(item, |a, b| Ok(a + b)).unwrap();
        }
        assert_eq!(context.into_inner(), Some(10));
    }

    #[test]
    fn test_populated_empty_collection_is_not_empty_context() {
        let context: ReducerContext<Vec<u8>> =
            ReducerContext::Empty.fold(Vec::new(), |a, _| Ok(a)).unwrap();
        assert!(context.is_populated());
        assert_eq!(context.into_inner(), Some(Vec::new()));
    }
}
