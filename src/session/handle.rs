//! The session: one caller's view of a repository.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Weak};

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::cache::LocalCache;
use super::error::{SessionError, SessionResult, SessionState};
use super::pending::PendingChanges;
use super::reference::DocRef;
use crate::binary::BinaryRef;
use crate::invalidation::{InvalidationMessage, Invalidations, SessionInfo};
use crate::model::{acl, DocumentModel, PropertyValue, ROOT_TYPE};
use crate::pool::PooledConnection;
use crate::repository::{GitConnectionFactory, Repository};
use crate::storage::{
    generate_id, ChildIndex, CommitMessage, GitSignature, NodeId, NodeName, NodeRecord, StorageError,
};

/// A single caller's handle onto a repository.
///
/// Reads go through a private cache and see this session's pending
/// changes; nothing reaches the backend before [`save`](Session::save).
/// A session owns one pooled connection and gives it back when dropped.
pub struct Session {
    id: String,
    principal: String,
    repository_name: String,
    repository: Weak<Repository>,
    connection: PooledConnection<GitConnectionFactory>,
    inbox: Receiver<InvalidationMessage>,
    cache: LocalCache,
    pending: PendingChanges,
    state: SessionState,
}

impl Session {
    pub(crate) fn open(
        repository: &Arc<Repository>,
        connection: PooledConnection<GitConnectionFactory>,
        principal: &str,
    ) -> Self {
        let id = generate_id();
        let inbox = repository
            .propagator()
            .register(SessionInfo::new(id.clone(), principal));
        debug!(repository = %repository.name(), session = %id, principal = %principal, "session opened");

        Self {
            id,
            principal: principal.to_string(),
            repository_name: repository.name().to_string(),
            repository: Arc::downgrade(repository),
            connection,
            inbox,
            cache: LocalCache::new(),
            pending: PendingChanges::new(),
            state: SessionState::Open,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// open, and its repository still registered somewhere
    pub fn is_live(&self) -> bool {
        self.state == SessionState::Open && self.repository.strong_count() > 0
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// drop every cached entry; pending changes are kept
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // reads

    /// Get a document by id or path.
    pub fn get_document(&mut self, reference: impl Into<DocRef>) -> SessionResult<DocumentModel> {
        self.begin()?;
        let record = self.visible(&reference.into())?;
        self.to_model(record)
    }

    pub fn get_root(&mut self) -> SessionResult<DocumentModel> {
        self.get_document(DocRef::root())
    }

    /// Readable children, ordered by name.
    pub fn get_children(&mut self, reference: impl Into<DocRef>) -> SessionResult<Vec<DocumentModel>> {
        self.begin()?;
        let parent = self.visible(&reference.into())?;

        let mut children = Vec::new();
        for id in self.children_of(&parent.id)?.into_values() {
            let Some(record) = self.record_of(&id)? else {
                continue;
            };
            if self.readable(&record)? {
                children.push(self.to_model(record)?);
            }
        }
        Ok(children)
    }

    /// The parent document, `None` for the root, versions and unreadable parents.
    pub fn get_parent(&mut self, reference: impl Into<DocRef>) -> SessionResult<Option<DocumentModel>> {
        self.begin()?;
        let record = self.visible(&reference.into())?;
        let Some(parent_id) = record.parent_id else {
            return Ok(None);
        };
        match self.record_of(&parent_id)? {
            Some(parent) if self.readable(&parent)? => Ok(Some(self.to_model(parent)?)),
            _ => Ok(None),
        }
    }

    pub fn exists(&mut self, reference: impl Into<DocRef>) -> SessionResult<bool> {
        match self.get_document(reference) {
            Ok(_) => Ok(true),
            Err(SessionError::DocumentNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn get_path(&mut self, id: &NodeId) -> SessionResult<String> {
        Ok(self.get_document(id)?.path().to_string())
    }

    // writes

    /// Create a document; visible to this session at once, to others after save.
    pub fn create_document(
        &mut self,
        parent: impl Into<DocRef>,
        name: &str,
        doc_type: &str,
        properties: BTreeMap<String, PropertyValue>,
    ) -> SessionResult<DocumentModel> {
        self.begin()?;
        let repo = self.repo()?;
        let name = NodeName::new(name)?;
        if doc_type == ROOT_TYPE {
            return Err(SessionError::InvalidTreeOperation("there is only one root".to_string()));
        }
        repo.schemas().get_type(doc_type)?;
        repo.schemas().validate_properties(doc_type, &properties)?;

        let parent = self.visible(&parent.into())?;
        self.check_new_child(&repo, &parent, &name, None)?;

        let mut record = NodeRecord::new(NodeId::generate(), Some(parent.id.clone()), name, doc_type);
        record.properties = properties
            .iter()
            .map(|(xpath, value)| (xpath.clone(), value.to_json()))
            .collect();

        debug!(session = %self.id, node = %record.id, parent = %parent.id, "document created");
        self.pending.create(record.clone());
        self.to_model(record)
    }

    /// Stage the local edits of `doc`.
    ///
    /// Only dirty properties are written, on top of the latest state this
    /// session knows; the version `doc` was read at is checked on save.
    pub fn save_document(&mut self, doc: &DocumentModel) -> SessionResult<DocumentModel> {
        self.begin()?;
        let repo = self.repo()?;
        if doc.is_version() {
            return Err(SessionError::InvalidTreeOperation(format!(
                "version {} is immutable",
                doc.id()
            )));
        }

        for (xpath, value) in doc.dirty_properties() {
            if let Some(value) = value {
                repo.schemas().validate_property(doc.doc_type(), xpath, value)?;
            }
        }

        let current = self
            .record_of(doc.id())?
            .ok_or_else(|| SessionError::DocumentNotFound(doc.id().to_string()))?;
        if !doc.is_dirty() {
            return self.to_model(current);
        }

        let mut next = current;
        doc.apply_to(&mut next);
        next.modified_at = Utc::now();

        debug!(session = %self.id, node = %next.id, "document changes staged");
        self.pending.update(next.clone(), doc.change_token());
        self.to_model(next)
    }

    /// Move (and optionally rename) a document under a new parent.
    pub fn move_document(
        &mut self,
        reference: impl Into<DocRef>,
        new_parent: impl Into<DocRef>,
        new_name: Option<&str>,
    ) -> SessionResult<DocumentModel> {
        self.begin()?;
        let repo = self.repo()?;
        let record = self.visible(&reference.into())?;
        self.check_detachable(&record, "move")?;

        let parent = self.visible(&new_parent.into())?;
        let name = match new_name {
            Some(name) => NodeName::new(name)?,
            None => record.name.clone(),
        };
        self.check_new_child(&repo, &parent, &name, Some(&record.id))?;
        if self.is_same_or_descendant(&parent, &record.id)? {
            return Err(SessionError::InvalidTreeOperation(format!(
                "cannot move {} under itself or one of its descendants",
                record.id
            )));
        }

        let read_version = record.version;
        let mut next = record;
        next.parent_id = Some(parent.id.clone());
        next.name = name;
        next.modified_at = Utc::now();

        debug!(session = %self.id, node = %next.id, parent = %parent.id, "document moved");
        self.pending.update(next.clone(), read_version);
        self.to_model(next)
    }

    /// Deep copy of a document and its subtree, with new ids.
    pub fn copy_document(
        &mut self,
        reference: impl Into<DocRef>,
        new_parent: impl Into<DocRef>,
        new_name: Option<&str>,
    ) -> SessionResult<DocumentModel> {
        self.begin()?;
        let repo = self.repo()?;
        let source = self.visible(&reference.into())?;
        self.check_detachable(&source, "copy")?;

        let parent = self.visible(&new_parent.into())?;
        let name = match new_name {
            Some(name) => NodeName::new(name)?,
            None => source.name.clone(),
        };
        self.check_new_child(&repo, &parent, &name, None)?;
        if self.is_same_or_descendant(&parent, &source.id)? {
            return Err(SessionError::InvalidTreeOperation(format!(
                "cannot copy {} into its own subtree",
                source.id
            )));
        }

        let copy = self.copy_tree(source, parent.id, name)?;
        self.to_model(copy)
    }

    /// Remove a document and its whole subtree; applied all-or-nothing on save.
    pub fn remove_document(&mut self, reference: impl Into<DocRef>) -> SessionResult<()> {
        self.begin()?;
        let record = self.visible(&reference.into())?;
        self.check_detachable(&record, "remove")?;

        let mut subtree = Vec::new();
        let mut stack = vec![record];
        while let Some(node) = stack.pop() {
            for child in self.children_of(&node.id)?.into_values() {
                if let Some(child) = self.record_of(&child)? {
                    stack.push(child);
                }
            }
            subtree.push((node.id, node.version));
        }

        debug!(session = %self.id, count = subtree.len(), "subtree removal staged");
        for (id, version) in subtree {
            self.pending.delete(&id, version);
        }
        Ok(())
    }

    // versions and proxies

    /// Record an immutable version of a document.
    pub fn check_in(&mut self, reference: impl Into<DocRef>, label: Option<&str>) -> SessionResult<DocumentModel> {
        self.begin()?;
        let source = self.visible(&reference.into())?;
        self.check_detachable(&source, "check in")?;
        if source.is_proxy {
            return Err(SessionError::InvalidTreeOperation(format!(
                "cannot check in proxy {}",
                source.id
            )));
        }

        let count = self.version_ids(&source.id)?.len();
        let mut version = NodeRecord::new(NodeId::generate(), None, source.name.clone(), source.doc_type.clone());
        version.properties = source.properties.clone();
        version.acl = source.acl.clone();
        version.lifecycle_state = source.lifecycle_state.clone();
        version.is_version = true;
        version.source_id = Some(source.id.clone());
        version.version_label = Some(
            label
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.0", count + 1)),
        );

        debug!(session = %self.id, node = %source.id, version = %version.id, "version checked in");
        self.pending.create(version.clone());
        self.to_model(version)
    }

    /// Versions of a document, oldest first.
    pub fn get_versions(&mut self, reference: impl Into<DocRef>) -> SessionResult<Vec<DocumentModel>> {
        self.begin()?;
        let source = self.visible(&reference.into())?;

        let mut versions = Vec::new();
        for id in self.version_ids(&source.id)? {
            if let Some(record) = self.record_of(&id)? {
                versions.push(self.to_model(record)?);
            }
        }
        Ok(versions)
    }

    /// Place a proxy to `target` in the tree.
    pub fn create_proxy(
        &mut self,
        target: impl Into<DocRef>,
        parent: impl Into<DocRef>,
        name: &str,
    ) -> SessionResult<DocumentModel> {
        self.begin()?;
        let repo = self.repo()?;
        let target = self.visible(&target.into())?;
        if target.id.is_root() {
            return Err(SessionError::InvalidTreeOperation("cannot proxy the root".to_string()));
        }
        let parent = self.visible(&parent.into())?;
        let name = NodeName::new(name)?;
        self.check_new_child(&repo, &parent, &name, None)?;

        let mut proxy = NodeRecord::new(NodeId::generate(), Some(parent.id.clone()), name, target.doc_type.clone());
        proxy.properties = target.properties.clone();
        proxy.is_proxy = true;
        proxy.source_id = Some(target.id.clone());

        debug!(session = %self.id, node = %proxy.id, target = %target.id, "proxy created");
        self.pending.create(proxy.clone());
        self.to_model(proxy)
    }

    // binaries

    /// Store content in the repository's binary store.
    pub fn store_binary(&self, bytes: &[u8]) -> SessionResult<BinaryRef> {
        self.ensure_open()?;
        Ok(self.repo()?.binaries().store(bytes)?)
    }

    /// Local file holding the content of a binary.
    pub fn get_binary_file(&self, binary: &BinaryRef) -> SessionResult<PathBuf> {
        self.ensure_open()?;
        Ok(self
            .repo()?
            .binaries()
            .get_file_for_digest(&binary.digest.to_hex(), false)?)
    }

    // lifecycle

    /// Flush pending changes as one commit.
    ///
    /// On a conflict every pending change is dropped, the touched nodes are
    /// marked stale and `ConcurrentUpdate` names the offending ids.
    #[instrument(skip(self), fields(repository = %self.repository_name, session = %self.id))]
    pub fn save(&mut self) -> SessionResult<()> {
        self.ensure_open()?;
        let repo = self.repo()?;
        self.state = SessionState::Saving;
        let result = self.flush(&repo);
        self.state = SessionState::Open;
        result
    }

    /// Save, then close.
    pub fn commit(mut self) -> SessionResult<()> {
        self.ensure_open()?;
        let repo = self.repo()?;
        self.state = SessionState::Committing;
        let result = self.flush(&repo);
        self.state = SessionState::Closed;
        result
    }

    /// Close without saving.
    pub fn rollback(mut self) {
        if !self.pending.is_empty() {
            debug!(session = %self.id, "discarding pending changes");
        }
        self.pending.clear();
        self.state = SessionState::Closed;
    }

    pub fn close(self) {
        self.rollback();
    }

    fn flush(&mut self, repo: &Repository) -> SessionResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = self.pending.to_batch();
        let touched = self.pending.touched();
        let (created, updated, deleted) = batch.counts();
        let message = CommitMessage::batch(Some(&self.id), created, updated, deleted);
        let signature = GitSignature::for_principal(&self.principal);

        let result = {
            let _writes = repo.lock_writes();
            self.connection.write_batch(&batch, &signature, &message)
        };

        match result {
            Ok(outcome) => {
                self.pending.clear();
                for id in touched
                    .iter()
                    .chain(&outcome.deleted)
                    .chain(&outcome.children_changed)
                {
                    self.cache.invalidate(id);
                }
                repo.propagator().propagate(&self.id, &Invalidations::from(&outcome));
                info!(
                    commit = %outcome.commit.short(),
                    created,
                    updated,
                    deleted,
                    "changes saved"
                );
                Ok(())
            }
            Err(StorageError::Conflict { ids }) => Err(self.discard_after_conflict(touched, ids)),
            Err(StorageError::ConcurrentModification { .. }) => {
                let ids = touched.iter().cloned().collect();
                Err(self.discard_after_conflict(touched, ids))
            }
            Err(source) => Err(self.backend_error(source)),
        }
    }

    fn discard_after_conflict(&mut self, touched: std::collections::BTreeSet<NodeId>, ids: Vec<NodeId>) -> SessionError {
        self.pending.clear();
        for id in touched.iter().chain(&ids) {
            self.cache.invalidate(id);
        }
        debug!(session = %self.id, conflicts = ids.len(), "concurrent update, pending changes dropped");
        SessionError::ConcurrentUpdate { ids }
    }

    // internals

    fn ensure_open(&self) -> SessionResult<()> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(SessionError::NotLive {
                session: self.id.clone(),
                state: self.state,
            })
        }
    }

    fn repo(&self) -> SessionResult<Arc<Repository>> {
        self.repository
            .upgrade()
            .ok_or_else(|| SessionError::RepositoryClosed(self.repository_name.clone()))
    }

    fn backend_error(&self, source: StorageError) -> SessionError {
        SessionError::Backend {
            repository: self.repository_name.clone(),
            session: self.id.clone(),
            source,
        }
    }

    /// start of every operation: apply invalidations that arrived since
    fn begin(&mut self) -> SessionResult<()> {
        self.ensure_open()?;
        self.repo()?.propagator().receive_cluster();
        for message in self.inbox.try_iter() {
            self.cache.apply(&message);
        }
        Ok(())
    }

    fn base_record(&mut self, id: &NodeId) -> SessionResult<Option<NodeRecord>> {
        if let Some(cached) = self.cache.record(id) {
            return Ok(cached.cloned());
        }
        let head = self.connection.head().map_err(|e| self.backend_error(e))?;
        let record = self
            .connection
            .read_node(id, head)
            .map_err(|e| self.backend_error(e))?;
        self.cache.put_record(id.clone(), record.clone());
        Ok(record)
    }

    fn base_children(&mut self, id: &NodeId) -> SessionResult<ChildIndex> {
        if let Some(cached) = self.cache.children(id) {
            return Ok(cached.clone());
        }
        let head = self.connection.head().map_err(|e| self.backend_error(e))?;
        let children = self
            .connection
            .read_children(id, head)
            .map_err(|e| self.backend_error(e))?;
        self.cache.put_children(id.clone(), children.clone());
        Ok(children)
    }

    /// the record as this session sees it, pending changes included
    fn record_of(&mut self, id: &NodeId) -> SessionResult<Option<NodeRecord>> {
        if self.pending.is_deleted(id) {
            return Ok(None);
        }
        if let Some(record) = self.pending.record(id) {
            return Ok(Some(record.clone()));
        }
        self.base_record(id)
    }

    fn children_of(&mut self, id: &NodeId) -> SessionResult<ChildIndex> {
        let base = if self.pending.is_created(id) {
            ChildIndex::new()
        } else {
            self.base_children(id)?
        };
        Ok(self.pending.overlay_children(id, base))
    }

    fn version_ids(&mut self, source: &NodeId) -> SessionResult<Vec<NodeId>> {
        let mut ids = if self.pending.is_created(source) {
            Vec::new()
        } else {
            let head = self.connection.head().map_err(|e| self.backend_error(e))?;
            self.connection
                .read_versions(source, head)
                .map_err(|e| self.backend_error(e))?
        };
        ids.extend(self.pending.versions_of(source));
        Ok(ids)
    }

    fn resolve(&mut self, reference: &DocRef) -> SessionResult<NodeRecord> {
        let not_found = || SessionError::DocumentNotFound(reference.to_string());
        match reference {
            DocRef::Id(id) => self.record_of(id)?.ok_or_else(not_found),
            DocRef::Path(path) => {
                let mut current = NodeId::root();
                for segment in path.split('/').filter(|s| !s.is_empty()) {
                    current = self
                        .children_of(&current)?
                        .remove(segment)
                        .ok_or_else(not_found)?;
                }
                self.record_of(&current)?.ok_or_else(not_found)
            }
        }
    }

    /// resolve, hiding what the principal may not read
    fn visible(&mut self, reference: &DocRef) -> SessionResult<NodeRecord> {
        let record = self.resolve(reference)?;
        if self.readable(&record)? {
            Ok(record)
        } else {
            Err(SessionError::DocumentNotFound(reference.to_string()))
        }
    }

    /// ancestors of a record, nearest first; versions continue at their source
    fn lineage(&mut self, record: &NodeRecord) -> SessionResult<Vec<NodeRecord>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([record.id.clone()]);
        let mut next = lineage_step(record);

        while let Some(id) = next {
            if !visited.insert(id.clone()) {
                break;
            }
            let Some(ancestor) = self.record_of(&id)? else {
                break;
            };
            next = lineage_step(&ancestor);
            chain.push(ancestor);
        }
        Ok(chain)
    }

    fn readable(&mut self, record: &NodeRecord) -> SessionResult<bool> {
        if self.principal == acl::SYSTEM {
            return Ok(true);
        }
        let lineage = self.lineage(record)?;
        let chain = std::iter::once(record.acl.as_slice()).chain(lineage.iter().map(|r| r.acl.as_slice()));
        Ok(acl::can_read(&self.principal, chain))
    }

    fn to_model(&mut self, record: NodeRecord) -> SessionResult<DocumentModel> {
        let repo = self.repo()?;
        let lineage = self.lineage(&record)?;
        let path = path_of(&record, &lineage);
        Ok(DocumentModel::from_record(record, path, repo.schemas()))
    }

    fn is_same_or_descendant(&mut self, node: &NodeRecord, ancestor: &NodeId) -> SessionResult<bool> {
        if &node.id == ancestor {
            return Ok(true);
        }
        Ok(self.lineage(node)?.iter().any(|r| &r.id == ancestor))
    }

    /// root and versions stay where they are
    fn check_detachable(&self, record: &NodeRecord, operation: &str) -> SessionResult<()> {
        if record.id.is_root() {
            return Err(SessionError::InvalidTreeOperation(format!("cannot {} the root", operation)));
        }
        if record.is_version {
            return Err(SessionError::InvalidTreeOperation(format!(
                "cannot {} version {}, versions are immutable",
                operation, record.id
            )));
        }
        Ok(())
    }

    /// `name` must be free under a folderish, non-version `parent`
    fn check_new_child(
        &mut self,
        repo: &Repository,
        parent: &NodeRecord,
        name: &NodeName,
        moving: Option<&NodeId>,
    ) -> SessionResult<()> {
        if parent.is_version {
            return Err(SessionError::InvalidTreeOperation(format!(
                "version {} cannot have children",
                parent.id
            )));
        }
        repo.schemas().check_folderish(&parent.doc_type)?;

        match self.children_of(&parent.id)?.get(name.as_str()) {
            Some(existing) if Some(existing) != moving => Err(SessionError::InvalidTreeOperation(format!(
                "{} already has a child named {}",
                parent.id, name
            ))),
            _ => Ok(()),
        }
    }

    fn copy_tree(&mut self, source: NodeRecord, parent: NodeId, name: NodeName) -> SessionResult<NodeRecord> {
        let children = self.children_of(&source.id)?;

        let mut copy = NodeRecord::new(NodeId::generate(), Some(parent), name, source.doc_type.clone());
        copy.properties = source.properties.clone();
        copy.acl = source.acl.clone();
        copy.lifecycle_state = source.lifecycle_state.clone();
        copy.is_proxy = source.is_proxy;
        copy.source_id = source.source_id.clone();
        self.pending.create(copy.clone());

        for child_id in children.into_values() {
            if let Some(child) = self.record_of(&child_id)? {
                let child_name = child.name.clone();
                self.copy_tree(child, copy.id.clone(), child_name)?;
            }
        }
        Ok(copy)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(repo) = self.repository.upgrade() {
            repo.propagator().unregister(&self.id);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("repository", &self.repository_name)
            .field("state", &self.state)
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn lineage_step(record: &NodeRecord) -> Option<NodeId> {
    match (&record.parent_id, record.is_version) {
        (Some(parent), _) => Some(parent.clone()),
        (None, true) => record.source_id.clone(),
        (None, false) => None,
    }
}

/// absolute path from a record and its lineage; versions take their source's
fn path_of(record: &NodeRecord, lineage: &[NodeRecord]) -> String {
    let names: Vec<&str> = std::iter::once(record)
        .chain(lineage)
        .skip_while(|r| r.is_version)
        .take_while(|r| !r.id.is_root())
        .map(|r| r.name.as_str())
        .collect();
    let mut path = String::new();
    for name in names.iter().rev() {
        path.push('/');
        path.push_str(name);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::invalidation::{ClusterBus, InMemoryClusterBus};
    use crate::model::{FILE_TYPE, FOLDER_TYPE, NOTE_TYPE};
    use crate::storage::Ace;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Repository>) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::builder(RepositoryConfig::new("docs", dir.path().join("docs")))
            .build()
            .unwrap();
        (dir, Arc::new(repo))
    }

    fn title(value: &str) -> BTreeMap<String, PropertyValue> {
        let mut props = BTreeMap::new();
        props.insert("dc:title".to_string(), PropertyValue::from(value));
        props
    }

    fn no_props() -> BTreeMap<String, PropertyValue> {
        BTreeMap::new()
    }

    #[test]
    fn test_session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Session>();
    }

    #[test]
    fn test_session_ids() {
        let (_dir, repo) = setup();
        let first = repo.open_session("alice").unwrap();
        let second = repo.open_session("alice").unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.id(), first.id().to_lowercase());
        assert!(NodeId::new(first.id()).is_ok());
        let ids: Vec<String> = repo.active_sessions().into_iter().map(|s| s.id).collect();
        assert!(ids.contains(&first.id().to_string()));
    }

    #[test]
    fn test_read_your_own_writes() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let mut other = repo.open_session("bob").unwrap();

        let folder = session.create_document("/", "projects", FOLDER_TYPE, title("Projects")).unwrap();
        let note = session.create_document(&folder, "readme", NOTE_TYPE, title("Readme")).unwrap();

        assert!(session.has_pending_changes());
        assert_eq!(note.path(), "/projects/readme");
        assert_eq!(session.get_document("/projects/readme").unwrap().id(), note.id());
        assert_eq!(session.get_children("/projects").unwrap().len(), 1);
        assert!(!other.exists(note.id()).unwrap());

        session.save().unwrap();
        assert!(!session.has_pending_changes());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(other.get_document("/projects/readme").unwrap().title(), Some("Readme"));
        assert_eq!(session.get_path(note.id()).unwrap(), "/projects/readme");
    }

    #[test]
    fn test_cached_absence_is_dropped_after_peer_create() {
        let (_dir, repo) = setup();
        let mut writer = repo.open_session("alice").unwrap();
        let mut reader = repo.open_session("bob").unwrap();

        reader.get_children("/").unwrap();
        let note = writer.create_document("/", "late", NOTE_TYPE, title("Late")).unwrap();
        assert!(!reader.exists(note.id()).unwrap());
        assert!(!reader.exists("/late").unwrap());

        writer.save().unwrap();

        assert_eq!(reader.get_document(note.id()).unwrap().title(), Some("Late"));
        assert_eq!(reader.get_path(note.id()).unwrap(), "/late");
        let names: Vec<String> = reader
            .get_children("/")
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["late"]);
    }

    #[test]
    fn test_create_validation() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let file = session.create_document("/", "a.txt", FILE_TYPE, no_props()).unwrap();

        let duplicate = session.create_document("/", "a.txt", NOTE_TYPE, no_props());
        assert!(matches!(duplicate, Err(SessionError::InvalidTreeOperation(_))));

        let under_file = session.create_document(&file, "child", NOTE_TYPE, no_props());
        assert!(matches!(under_file, Err(SessionError::Schema(_))));

        let mut bad = BTreeMap::new();
        bad.insert("dc:title".to_string(), PropertyValue::Long(1));
        assert!(matches!(
            session.create_document("/", "b", NOTE_TYPE, bad),
            Err(SessionError::Schema(_))
        ));
        assert!(matches!(
            session.create_document("/", "a/b", NOTE_TYPE, no_props()),
            Err(SessionError::InvalidName(_))
        ));
        assert!(session.create_document("/missing", "x", NOTE_TYPE, no_props()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_move_into_own_subtree_fails() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let a = session.create_document("/", "a", FOLDER_TYPE, no_props()).unwrap();
        let b = session.create_document(&a, "b", FOLDER_TYPE, no_props()).unwrap();
        session.save().unwrap();

        let result = session.move_document(&a, &b, None);
        assert!(matches!(result, Err(SessionError::InvalidTreeOperation(_))));
        let result = session.move_document(&a, &a, None);
        assert!(matches!(result, Err(SessionError::InvalidTreeOperation(_))));

        assert!(!session.has_pending_changes());
        assert_eq!(session.get_path(b.id()).unwrap(), "/a/b");
        assert_eq!(session.get_parent(&a).unwrap().unwrap().id(), &NodeId::root());
    }

    #[test]
    fn test_move_and_rename() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let a = session.create_document("/", "a", FOLDER_TYPE, no_props()).unwrap();
        let b = session.create_document("/", "b", FOLDER_TYPE, no_props()).unwrap();
        let note = session.create_document(&a, "n", NOTE_TYPE, no_props()).unwrap();
        session.save().unwrap();

        session.create_document(&b, "taken", NOTE_TYPE, no_props()).unwrap();
        let clash = session.move_document(&note, &b, Some("taken"));
        assert!(matches!(clash, Err(SessionError::InvalidTreeOperation(_))));

        let moved = session.move_document(&note, &b, Some("renamed")).unwrap();
        assert_eq!(moved.path(), "/b/renamed");
        session.save().unwrap();

        let mut reader = repo.open_session("bob").unwrap();
        assert!(reader.get_children(&a).unwrap().is_empty());
        let names: Vec<String> = reader
            .get_children(&b)
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["renamed", "taken"]);
    }

    #[test]
    fn test_peer_sees_update_after_invalidation() {
        let (_dir, repo) = setup();
        let mut writer = repo.open_session("alice").unwrap();
        let doc = writer.create_document("/", "report", FILE_TYPE, title("v1")).unwrap();
        writer.save().unwrap();

        let mut reader = repo.open_session("bob").unwrap();
        assert_eq!(reader.get_document(doc.id()).unwrap().title(), Some("v1"));

        let mut doc = writer.get_document(doc.id()).unwrap();
        doc.set_property("dc:title", "v2");
        writer.save_document(&doc).unwrap();
        writer.save().unwrap();

        let seen = reader.get_document(doc.id()).unwrap();
        assert_eq!(seen.title(), Some("v2"));
        assert_eq!(seen.change_token(), 2);
    }

    #[test]
    fn test_stale_update_conflicts() {
        let (_dir, repo) = setup();
        let mut first = repo.open_session("alice").unwrap();
        let doc = first.create_document("/", "report", FILE_TYPE, title("v1")).unwrap();
        first.save().unwrap();

        let mut second = repo.open_session("bob").unwrap();
        let mut mine = first.get_document(doc.id()).unwrap();
        let mut theirs = second.get_document(doc.id()).unwrap();

        mine.set_property("dc:title", "alice");
        first.save_document(&mine).unwrap();
        first.save().unwrap();

        theirs.set_property("dc:title", "bob");
        second.save_document(&theirs).unwrap();
        match second.save() {
            Err(SessionError::ConcurrentUpdate { ids }) => assert_eq!(ids, vec![doc.id().clone()]),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(!second.has_pending_changes());

        // retry on fresh state
        let mut theirs = second.get_document(doc.id()).unwrap();
        assert_eq!(theirs.title(), Some("alice"));
        theirs.set_property("dc:title", "bob");
        second.save_document(&theirs).unwrap();
        second.save().unwrap();
        assert_eq!(first.get_document(doc.id()).unwrap().title(), Some("bob"));
    }

    #[test]
    fn test_restaging_keeps_first_read() {
        let (_dir, repo) = setup();
        let mut first = repo.open_session("alice").unwrap();
        let doc = first.create_document("/", "report", FILE_TYPE, title("v1")).unwrap();
        first.save().unwrap();

        let mut doc = first.get_document(doc.id()).unwrap();
        doc.set_property("dc:title", "v2");
        first.save_document(&doc).unwrap();
        doc.set_property("dc:description", "about");
        first.save_document(&doc).unwrap();
        first.save().unwrap();

        let saved = first.get_document(doc.id()).unwrap();
        assert_eq!(saved.title(), Some("v2"));
        assert_eq!(saved.property("dc:description"), Some(&PropertyValue::from("about")));
        assert_eq!(saved.change_token(), 2);
    }

    #[test]
    fn test_subtree_delete_is_all_or_nothing() {
        let (_dir, repo) = setup();
        let mut first = repo.open_session("alice").unwrap();
        let folder = first.create_document("/", "f", FOLDER_TYPE, no_props()).unwrap();
        first.create_document(&folder, "c1", NOTE_TYPE, no_props()).unwrap();
        first.save().unwrap();

        first.remove_document(&folder).unwrap();
        assert!(!first.exists("/f").unwrap());

        let mut second = repo.open_session("bob").unwrap();
        second.create_document(&folder, "c2", NOTE_TYPE, no_props()).unwrap();
        second.save().unwrap();

        assert!(matches!(first.save(), Err(SessionError::ConcurrentUpdate { .. })));
        let names: Vec<String> = first
            .get_children("/f")
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["c1", "c2"]);

        first.remove_document("/f").unwrap();
        first.save().unwrap();
        assert!(!second.exists("/f").unwrap());
        assert!(!second.exists("/f/c2").unwrap());
    }

    #[test]
    fn test_remove_root_fails() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        assert!(matches!(
            session.remove_document(DocRef::root()),
            Err(SessionError::InvalidTreeOperation(_))
        ));
    }

    #[test]
    fn test_rollback_and_commit() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        session.create_document("/", "gone", NOTE_TYPE, no_props()).unwrap();
        session.rollback();

        let mut session = repo.open_session("alice").unwrap();
        assert!(!session.exists("/gone").unwrap());
        session.create_document("/", "kept", NOTE_TYPE, no_props()).unwrap();
        session.commit().unwrap();

        let mut reader = repo.open_session("bob").unwrap();
        assert!(reader.exists("/kept").unwrap());
        assert_eq!(repo.active_sessions().len(), 1);
    }

    #[test]
    fn test_copy_is_deep() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let src = session.create_document("/", "src", FOLDER_TYPE, title("Source")).unwrap();
        let child = session.create_document(&src, "child", NOTE_TYPE, title("Child")).unwrap();
        session.save().unwrap();

        let copy = session.copy_document(&src, "/", Some("dst")).unwrap();
        assert_ne!(copy.id(), src.id());
        session.save().unwrap();

        let copied_child = session.get_document("/dst/child").unwrap();
        assert_ne!(copied_child.id(), child.id());
        assert_eq!(copied_child.title(), Some("Child"));
        assert_eq!(session.get_document("/src/child").unwrap().id(), child.id());

        assert!(matches!(
            session.copy_document(&src, &src, Some("again")),
            Err(SessionError::InvalidTreeOperation(_))
        ));
    }

    #[test]
    fn test_versions_are_immutable() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let doc = session.create_document("/", "report", FILE_TYPE, title("Draft")).unwrap();
        session.save().unwrap();

        let version = session.check_in(&doc, None).unwrap();
        assert!(version.is_version());
        assert_eq!(version.source_id(), Some(doc.id()));
        assert_eq!(version.version_label(), Some("1.0"));
        assert_eq!(version.path(), "/report");
        session.save().unwrap();

        session.check_in(&doc, Some("final")).unwrap();
        let versions = session.get_versions(&doc).unwrap();
        let labels: Vec<_> = versions.iter().map(|v| v.version_label()).collect();
        assert_eq!(labels, vec![Some("1.0"), Some("final")]);

        let mut version = session.get_document(version.id()).unwrap();
        version.set_property("dc:title", "changed");
        assert!(matches!(session.save_document(&version), Err(SessionError::InvalidTreeOperation(_))));
        assert!(matches!(session.move_document(&version, "/", None), Err(SessionError::InvalidTreeOperation(_))));
        assert!(matches!(session.remove_document(&version), Err(SessionError::InvalidTreeOperation(_))));
        assert!(session.get_children("/").unwrap().iter().all(|d| !d.is_version()));
    }

    #[test]
    fn test_proxy_points_at_target() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let folder = session.create_document("/", "published", FOLDER_TYPE, no_props()).unwrap();
        let doc = session.create_document("/", "report", FILE_TYPE, title("Report")).unwrap();

        let proxy = session.create_proxy(&doc, &folder, "report").unwrap();
        session.save().unwrap();

        let proxy = session.get_document(proxy.id()).unwrap();
        assert!(proxy.is_proxy());
        assert_eq!(proxy.source_id(), Some(doc.id()));
        assert_eq!(proxy.path(), "/published/report");
        assert_eq!(proxy.title(), Some("Report"));
    }

    #[test]
    fn test_read_acl_hides_documents() {
        let (_dir, repo) = setup();
        let mut owner = repo.open_session("alice").unwrap();
        let mut private = owner.create_document("/", "private", FOLDER_TYPE, no_props()).unwrap();
        owner.create_document(&private, "secret", NOTE_TYPE, no_props()).unwrap();
        private.set_acl(vec![
            Ace::grant("alice", acl::READ),
            Ace::deny(acl::EVERYONE, acl::EVERYTHING),
        ]);
        owner.save_document(&private).unwrap();
        owner.create_document("/", "public", FOLDER_TYPE, no_props()).unwrap();
        owner.save().unwrap();

        let mut other = repo.open_session("bob").unwrap();
        assert!(other.get_document("/private").unwrap_err().is_not_found());
        assert!(!other.exists("/private/secret").unwrap());
        let names: Vec<String> = other.get_children("/").unwrap().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["public"]);

        assert!(owner.exists("/private/secret").unwrap());
        let mut system = repo.open_session(acl::SYSTEM).unwrap();
        assert!(system.exists("/private/secret").unwrap());
    }

    #[test]
    fn test_cluster_invalidation_reaches_other_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared");
        let bus: Arc<dyn ClusterBus> = Arc::new(InMemoryClusterBus::new());
        let build = |node: &str| {
            Arc::new(
                Repository::builder(RepositoryConfig::new("docs", &path).cluster_node(node))
                    .cluster_bus(bus.clone())
                    .build()
                    .unwrap(),
            )
        };
        let first = build("n1");
        let second = build("n2");

        let mut writer = first.open_session("alice").unwrap();
        let doc = writer.create_document("/", "report", FILE_TYPE, title("v1")).unwrap();
        writer.save().unwrap();

        let mut reader = second.open_session("bob").unwrap();
        assert_eq!(reader.get_document(doc.id()).unwrap().title(), Some("v1"));

        let mut doc = writer.get_document(doc.id()).unwrap();
        doc.set_property("dc:title", "v2");
        writer.save_document(&doc).unwrap();
        writer.save().unwrap();

        assert_eq!(reader.get_document(doc.id()).unwrap().title(), Some("v2"));
    }

    #[test]
    fn test_without_invalidation_cache_is_served() {
        let (_dir, repo) = setup();
        let mut writer = repo.open_session("alice").unwrap();
        let doc = writer.create_document("/", "report", FILE_TYPE, title("v1")).unwrap();
        writer.save().unwrap();

        let mut reader = repo.open_session("bob").unwrap();
        reader.get_document(doc.id()).unwrap();

        // a writer outside this repository instance sends no invalidation
        let other = Arc::new(
            Repository::builder(RepositoryConfig::new("docs", repo.path()))
                .build()
                .unwrap(),
        );
        let mut outsider = other.open_session("carol").unwrap();
        let mut doc = outsider.get_document(doc.id()).unwrap();
        doc.set_property("dc:title", "v2");
        outsider.save_document(&doc).unwrap();
        outsider.save().unwrap();

        assert_eq!(reader.get_document(doc.id()).unwrap().title(), Some("v1"));
        reader.clear_cache();
        assert_eq!(reader.get_document(doc.id()).unwrap().title(), Some("v2"));
    }

    #[test]
    fn test_binaries() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        let first = session.store_binary(b"hello").unwrap();
        let second = session.store_binary(b"hello").unwrap();
        assert_eq!(first.digest, second.digest);

        let path = session.get_binary_file(&first).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");

        let mut props = title("Greeting");
        props.insert("file:content".to_string(), PropertyValue::Binary(first.clone()));
        let doc = session.create_document("/", "hello.txt", FILE_TYPE, props).unwrap();
        session.save().unwrap();

        let doc = session.get_document(doc.id()).unwrap();
        assert_eq!(doc.property("file:content").and_then(PropertyValue::as_binary), Some(&first));
    }

    #[test]
    fn test_closed_repository() {
        let (_dir, repo) = setup();
        let mut session = repo.open_session("alice").unwrap();
        drop(repo);

        assert!(!session.is_live());
        assert!(matches!(session.get_root(), Err(SessionError::RepositoryClosed(_))));
    }
}
