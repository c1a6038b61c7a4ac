use std::fmt;

use super::Node;

/// Index path from a thread group's root list down to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut indices = Vec::with_capacity(self.0.len().saturating_add(1));
        indices.extend_from_slice(&self.0);
        indices.push(index);
        Self(indices)
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn resolve<'tree>(&self, tree: &'tree [Node]) -> Option<&'tree Node> {
        let (last, parents) = self.0.split_last()?;
        let mut level = tree;
        for index in parents {
            level = &level.get(*index)?.children;
        }
        level.get(*last)
    }

    /// Non-walked nodes (timers, processors, listeners) that apply to the
    /// node at this path: children of every ancestor from the root down,
    /// then children of the node itself, each in tree order.
    #[must_use]
    pub fn scoped<'tree>(&self, tree: &'tree [Node]) -> Vec<(NodePath, &'tree Node)> {
        let mut scoped = Vec::new();
        let mut level = tree;
        let mut prefix = NodePath::root();
        collect_scope(&prefix, level, &mut scoped);
        for index in &self.0 {
            let Some(node) = level.get(*index) else {
                break;
            };
            prefix = prefix.child(*index);
            level = &node.children;
            collect_scope(&prefix, level, &mut scoped);
        }
        scoped
    }
}

fn collect_scope<'tree>(
    prefix: &NodePath,
    level: &'tree [Node],
    scoped: &mut Vec<(NodePath, &'tree Node)>,
) {
    for (index, node) in level.iter().enumerate() {
        if node.enabled && !node.kind.is_samplable() {
            scoped.push((prefix.child(index), node));
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for index in &self.0 {
            write!(f, "/{}", index)?;
        }
        Ok(())
    }
}
