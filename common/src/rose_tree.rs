//! Rose trees of pending work, one value per node and any number of children

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoseTree<T> {
    pub value: T,
    pub children: Vec<RoseTree<T>>,
}

impl<T> RoseTree<T> {
    pub fn new(value: T, children: Vec<RoseTree<T>>) -> Self {
        Self { value, children }
    }

    pub fn leaf(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    /// Build a single-branch tree from a path ordered oldest first.
    ///
    /// The newest element wraps `subtrees`, and each older element wraps
    /// the result. Returns `subtrees` unchanged if `path` is empty.
    pub fn from_path(path: Vec<T>, subtrees: Vec<RoseTree<T>>) -> Vec<RoseTree<T>> {
        path.into_iter()
            .rev()
            .fold(subtrees, |children, value| vec![RoseTree::new(value, children)])
    }

    /// Values in pre-order (parents before children)
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(&node.value)
        })
    }

    /// Consume the tree, returning values in pre-order
    pub fn into_values(self) -> Vec<T> {
        let mut values = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            values.push(node.value);
            stack.extend(node.children.into_iter().rev());
        }
        values
    }

    pub fn map<U>(self, f: &mut impl FnMut(T) -> U) -> RoseTree<U> {
        let value = f(self.value);
        let mut children = Vec::with_capacity(self.children.len());
        for child in self.children {
            children.push(child.map(&mut *f));
        }
        RoseTree { value, children }
    }

    pub fn len(&self) -> usize {
        1 + self.children.iter().map(RoseTree::len).sum::<usize>()
    }

    /// Number of generations, a leaf has depth 1
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(RoseTree::depth).max().unwrap_or(0)
    }
}

/// Consume a forest, returning every value in pre-order
pub fn forest_values<T>(forest: Vec<RoseTree<T>>) -> Vec<T> {
    forest.into_iter().flat_map(RoseTree::into_values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_wraps_subtrees_under_newest() {
        let subtrees = vec![RoseTree::leaf(10), RoseTree::leaf(11)];
        let forest = RoseTree::from_path(vec![1, 2, 3], subtrees);

        assert_eq!(forest.len(), 1);
        let root = &forest[0];
        assert_eq!(root.value, 1);
        assert_eq!(root.depth(), 4);
        assert_eq!(root.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 10, 11]);
    }

    #[test]
    fn from_empty_path_returns_subtrees() {
        let forest = RoseTree::from_path(Vec::new(), vec![RoseTree::leaf(7)]);
        assert_eq!(forest, vec![RoseTree::leaf(7)]);
    }

    #[test]
    fn map_and_into_values_preserve_order() {
        let tree = RoseTree::new(1, vec![RoseTree::new(2, vec![RoseTree::leaf(3)]), RoseTree::leaf(4)]);
        let doubled = tree.map(&mut |n| n * 2);
        assert_eq!(doubled.len(), 4);
        assert_eq!(doubled.into_values(), vec![2, 4, 6, 8]);
    }
}
