//! Disk-group tree: nested labels forming a dotted hierarchy (§4.1
//! `disk_path_find_or_create`). `a.b.c` implies parents `a.b` and `a`;
//! looking up or creating a path creates any missing ancestor groups
//! along the way, mirroring bcachefs's own `bch2_disk_path_find`.

#[derive(Debug, Clone)]
pub struct DiskGroup {
    pub label: String,
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DiskGroupTree {
    groups: Vec<DiskGroup>,
}

impl DiskGroupTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, idx: u32) -> Option<&DiskGroup> {
        self.groups.get(idx as usize)
    }

    /// Full dotted path of group `idx`, e.g. `"a.b.c"`.
    pub fn full_path(&self, idx: u32) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            let Some(g) = self.get(i) else { break };
            parts.push(g.label.clone());
            cur = g.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn find(&self, path: &str) -> Option<u32> {
        let mut parent = None;
        let mut found = None;
        for label in path.split('.') {
            found = self
                .groups
                .iter()
                .position(|g| g.label == label && g.parent == parent)
                .map(|i| i as u32);
            parent = found;
            found?;
        }
        found
    }

    /// Finds `path`, creating any missing component (including
    /// ancestors) along the way.
    pub fn find_or_create(&mut self, path: &str) -> u32 {
        let mut parent = None;
        let mut idx = 0u32;
        for label in path.split('.') {
            idx = match self
                .groups
                .iter()
                .position(|g| g.label == label && g.parent == parent)
            {
                Some(i) => i as u32,
                None => {
                    self.groups.push(DiskGroup {
                        label: label.to_string(),
                        parent,
                    });
                    (self.groups.len() - 1) as u32
                }
            };
            parent = Some(idx);
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_path_creates_ancestors() {
        let mut tree = DiskGroupTree::new();
        let c = tree.find_or_create("a.b.c");
        assert_eq!(tree.full_path(c), "a.b.c");
        assert!(tree.find("a").is_some());
        assert!(tree.find("a.b").is_some());
        assert_eq!(tree.find("a.b.c"), Some(c));
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let mut tree = DiskGroupTree::new();
        let first = tree.find_or_create("x.y");
        let second = tree.find_or_create("x.y");
        assert_eq!(first, second);
        assert_eq!(tree.groups.len(), 2);
    }

    #[test]
    fn distinct_branches_do_not_collide() {
        let mut tree = DiskGroupTree::new();
        let a = tree.find_or_create("root.a");
        let b = tree.find_or_create("root.b");
        assert_ne!(a, b);
    }
}
