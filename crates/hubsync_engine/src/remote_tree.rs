//! Parent/children index over the remote hierarchy of one project.

use crate::client::RemoteClient;
use crate::error::SyncResult;
use crate::hierarchy::HierarchyResolver;
use crate::projection::record_name;
use hubsync_model::fields::PROJECT_FIELD;
use hubsync_model::{same_slug, slug_key, Filter, ParentRef, RemoteRecord, RemoteRef, RemoteType};
use std::collections::{HashMap, HashSet};

/// A node of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// The project root.
    Project,
    /// A remote record.
    Record(RemoteRef),
    /// A synthesized grouping node, by slug key.
    Grouping(String),
}

/// The remote hierarchy of one project, loaded once per run.
#[derive(Debug)]
pub struct RemoteTree {
    records: HashMap<RemoteRef, RemoteRecord>,
    children: HashMap<NodeKey, Vec<NodeKey>>,
    groupings: HashMap<String, String>,
    created: HashSet<RemoteRef>,
    code_field: String,
}

impl RemoteTree {
    /// Loads every record of the enabled tree types.
    ///
    /// Records are attached parents' types first. A record whose parent is of
    /// a type that is not loaded is attached to the nearest loaded ancestor
    /// above that parent, or to the project root.
    pub fn load<R: RemoteClient + ?Sized>(
        remote: &R,
        project: &RemoteRecord,
        resolver: &HierarchyResolver,
        code_field: &str,
    ) -> SyncResult<Self> {
        let mut loaded = Vec::new();
        for kind in resolver.tree_types() {
            loaded.extend(remote.find(kind, &[Filter::link(PROJECT_FIELD, project.to_ref())])?);
        }

        let mut tree = Self::empty(code_field);
        for record in &loaded {
            tree.records.insert(record.to_ref(), record.clone());
        }
        let mut passed = HashMap::new();
        for record in loaded {
            let parent = tree.resolve_parent(remote, resolver, resolver.parent_of(&record), &mut passed)?;
            tree.attach(parent, NodeKey::Record(record.to_ref()));
        }
        Ok(tree)
    }

    fn empty(code_field: &str) -> Self {
        Self {
            records: HashMap::new(),
            children: HashMap::new(),
            groupings: HashMap::new(),
            created: HashSet::new(),
            code_field: code_field.to_string(),
        }
    }

    /// Climbs through records of types that are not synchronized.
    ///
    /// `passed` memoizes the fetched intermediate records across calls.
    fn resolve_parent<R: RemoteClient + ?Sized>(
        &mut self,
        remote: &R,
        resolver: &HierarchyResolver,
        mut parent: ParentRef,
        passed: &mut HashMap<RemoteRef, Option<RemoteRecord>>,
    ) -> SyncResult<NodeKey> {
        let mut seen = HashSet::new();
        loop {
            let target = match parent {
                ParentRef::Grouping(label) => return Ok(self.grouping(&label)),
                ParentRef::Remote(r) if self.records.contains_key(&r) => return Ok(NodeKey::Record(r)),
                ParentRef::Remote(r) => r,
                ParentRef::Project | ParentRef::Local(_) => return Ok(NodeKey::Project),
            };
            if resolver.is_enabled(target.kind) || !seen.insert(target) {
                return Ok(NodeKey::Project);
            }
            let record = match passed.get(&target) {
                Some(found) => found.clone(),
                None => {
                    let found = remote.find_one(target.kind, &[Filter::id(target.id)])?;
                    passed.insert(target, found.clone());
                    found
                }
            };
            match record {
                Some(record) => parent = resolver.parent_of(&record),
                None => return Ok(NodeKey::Project),
            }
        }
    }

    fn attach(&mut self, parent: NodeKey, child: NodeKey) {
        self.children.entry(parent).or_default().push(child);
    }

    /// The grouping node for a discriminator, attached under the root on first use.
    ///
    /// The label of the first sighting is kept.
    pub fn grouping(&mut self, label: &str) -> NodeKey {
        let key = slug_key(label);
        if !self.groupings.contains_key(&key) {
            self.groupings.insert(key.clone(), label.trim().to_string());
            self.attach(NodeKey::Project, NodeKey::Grouping(key.clone()));
        }
        NodeKey::Grouping(key)
    }

    /// A loaded record.
    pub fn record(&self, target: RemoteRef) -> Option<&RemoteRecord> {
        self.records.get(&target)
    }

    /// Label of a grouping node.
    pub fn grouping_label(&self, key: &str) -> Option<&str> {
        self.groupings.get(key).map(String::as_str)
    }

    /// Children of a node, in load then creation order.
    pub fn children(&self, parent: &NodeKey) -> Vec<NodeKey> {
        self.children.get(parent).cloned().unwrap_or_default()
    }

    /// Finds a child record by slug, preferring records that existed before this run.
    pub fn find_child<F>(&self, parent: &NodeKey, kind: RemoteType, name: &str, accept: F) -> Option<&RemoteRecord>
    where
        F: Fn(&RemoteRecord) -> bool,
    {
        let mut candidates = self
            .children
            .get(parent)
            .into_iter()
            .flatten()
            .filter_map(|key| match key {
                NodeKey::Record(r) => self.records.get(r),
                _ => None,
            })
            .filter(|record| {
                record.kind == kind
                    && record_name(record, &self.code_field).is_some_and(|n| same_slug(&n, name))
                    && accept(record)
            });
        let first = candidates.next()?;
        if !self.created.contains(&first.to_ref()) {
            return Some(first);
        }
        candidates
            .find(|record| !self.created.contains(&record.to_ref()))
            .or(Some(first))
    }

    /// Adds a record created during this run.
    pub fn insert_created(&mut self, parent: NodeKey, record: RemoteRecord) {
        let key = record.to_ref();
        self.created.insert(key);
        self.records.insert(key, record);
        self.attach(parent, NodeKey::Record(key));
    }

    /// Replaces a record with a fresher copy.
    pub fn replace(&mut self, record: RemoteRecord) {
        if let Some(slot) = self.records.get_mut(&record.to_ref()) {
            *slot = record;
        }
    }
}
