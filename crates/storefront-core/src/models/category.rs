use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A business's categories, in the order the API returned them.
pub type CategoryList = Vec<Category>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            slug: None,
            parent_id: None,
            position: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Arrange a flat list into `(depth, category)` pairs, parents before
    /// children. Siblings are ordered by `position`, then by their original
    /// order. Categories whose parent is not in the list are treated as roots.
    pub fn tree_order(categories: &[Category]) -> Vec<(usize, &Category)> {
        let known: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
        let mut children: HashMap<Option<&str>, Vec<(usize, &Category)>> = HashMap::new();
        for (index, category) in categories.iter().enumerate() {
            let parent = category
                .parent_id
                .as_deref()
                .filter(|p| known.contains(p) && *p != category.id);
            children.entry(parent).or_default().push((index, category));
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|(index, c)| (c.position.unwrap_or(i32::MAX), *index));
        }

        let mut ordered = Vec::with_capacity(categories.len());
        let mut stack: Vec<(usize, &Category)> = children
            .get(&None)
            .map(|roots| roots.iter().rev().map(|(_, c)| (0, *c)).collect())
            .unwrap_or_default();
        while let Some((depth, category)) = stack.pop() {
            ordered.push((depth, category));
            if let Some(kids) = children.get(&Some(category.id.as_str())) {
                stack.extend(kids.iter().rev().map(|(_, c)| (depth + 1, *c)));
            }
        }
        ordered
    }
}
