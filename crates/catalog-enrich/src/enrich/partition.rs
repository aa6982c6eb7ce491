//! Order-preserving split of pending work across credentials

/// Split `items` into exactly `n` contiguous partitions of `ceil(len / n)` items
///
/// The last non-empty partition takes the remainder; when there are fewer items than
/// partitions the trailing partitions are empty. Concatenating the result in order
/// reproduces `items`. `n == 0` yields no partitions.
pub fn partition<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    if n == 0 {
        return Vec::new();
    }

    let size = items.len().div_ceil(n).max(1);
    let mut partitions: Vec<Vec<T>> = Vec::with_capacity(n);
    let mut remaining = items.into_iter();

    for _ in 0..n {
        partitions.push(remaining.by_ref().take(size).collect());
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_uneven_split() {
        assert_eq!(partition(vec![1, 2, 3], 2), vec![vec![1, 2], vec![3]]);
        assert_eq!(
            partition((1..=5).collect(), 4),
            vec![vec![1, 2], vec![3, 4], vec![5], vec![]]
        );
    }

    #[test]
    fn test_fewer_items_than_partitions() {
        let parts = partition(vec!["a"], 3);
        assert_eq!(parts, vec![vec!["a"], vec![], vec![]]);
    }

    #[test]
    fn test_empty_input() {
        let parts: Vec<Vec<u8>> = partition(Vec::new(), 3);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_zero_partitions() {
        assert!(partition(vec![1, 2], 0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_concatenation_reproduces_input(
            items in proptest::collection::vec(any::<u32>(), 0..200),
            n in 1usize..16,
        ) {
            let parts = partition(items.clone(), n);
            prop_assert_eq!(parts.len(), n);

            let size = items.len().div_ceil(n);
            prop_assert!(parts.iter().all(|p| p.len() <= size.max(1)));

            let flattened: Vec<u32> = parts.into_iter().flatten().collect();
            prop_assert_eq!(flattened, items);
        }
    }
}
