use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::authority::RemoteAuthority;
use crate::commons::{ConsoleResult, Error};
use crate::model::{ConfigObject, ObjectId, ObjectKind};

use super::{ActionLog, ActionRecord, Operation};

//------------ Editor --------------------------------------------------------

/// Exposes the domain operations that stage records into an action log.
///
/// An editor never changes remote state. It appends records to the log it
/// was given, and it is up to whoever owns that log to drain and commit it.
/// Operations that need to look something up on the authority first (server
/// side defaults, dependents) compute all their records before appending
/// any, so a failed lookup leaves the log exactly as it was.
///
/// The editor borrows the log mutably, so nothing else can append to it
/// while the editor is alive. Several editors can be used one after the
/// other over the same log to stage a larger change for a single commit.
pub struct Editor<'a> {
    authority: Arc<dyn RemoteAuthority>,
    log: &'a mut ActionLog,
}

impl<'a> Editor<'a> {
    /// Creates an editor over a log owned by the caller.
    pub fn shared(authority: Arc<dyn RemoteAuthority>, log: &'a mut ActionLog) -> Self {
        Editor { authority, log }
    }

    /// The number of records in the underlying log.
    pub fn staged(&self) -> usize {
        self.log.len()
    }

    /// Stages the creation of an object populated with the server side
    /// defaults for its kind.
    pub async fn create(&mut self, id: &ObjectId, parent: Option<&ObjectId>) -> ConsoleResult<()> {
        self.create_with(id, parent, BTreeMap::new()).await
    }

    /// Stages the creation of an object populated with the server side
    /// defaults for its kind, overridden by the given properties.
    pub async fn create_with(
        &mut self,
        id: &ObjectId,
        parent: Option<&ObjectId>,
        properties: BTreeMap<String, String>,
    ) -> ConsoleResult<()> {
        let mut values = self
            .authority
            .property_defaults(id.kind())
            .await
            .map_err(|e| Error::staging(format!("create {id}"), e))?;
        values.extend(properties);

        let mut records = Vec::with_capacity(values.len() + 1);
        records.push(ActionRecord::new(
            id.clone(),
            Operation::Create {
                parent: parent.cloned(),
            },
        ));
        records.extend(
            values
                .into_iter()
                .map(|(name, value)| ActionRecord::new(id.clone(), Operation::SetProperty { name, value })),
        );

        debug!("Staging creation of {} with {} properties", id, records.len() - 1);
        self.log.extend(records)
    }

    pub fn set_property(&mut self, id: &ObjectId, name: &str, value: &str) -> ConsoleResult<()> {
        self.log
            .append(ActionRecord::new(id.clone(), Operation::set_property(name, value)))
    }

    pub fn set_properties(&mut self, id: &ObjectId, properties: &BTreeMap<String, String>) -> ConsoleResult<()> {
        let records = properties
            .iter()
            .map(|(name, value)| ActionRecord::new(id.clone(), Operation::set_property(name, value)))
            .collect();
        self.log.extend(records)
    }

    pub fn set_enabled(&mut self, id: &ObjectId, enabled: bool) -> ConsoleResult<()> {
        self.log.append(ActionRecord::new(id.clone(), Operation::enable(enabled)))
    }

    pub fn add_member(&mut self, id: &ObjectId, member: &str) -> ConsoleResult<()> {
        self.log.append(ActionRecord::new(id.clone(), Operation::add_member(member)))
    }

    pub fn remove_member(&mut self, id: &ObjectId, member: &str) -> ConsoleResult<()> {
        self.log.append(ActionRecord::new(id.clone(), Operation::remove_member(member)))
    }

    /// Stages the deletion of a single object without looking at its
    /// dependents. The authority rejects this if the object has any.
    pub fn delete(&mut self, id: &ObjectId) -> ConsoleResult<()> {
        self.log.append(ActionRecord::new(id.clone(), Operation::Delete))
    }

    /// Stages the deletion of an object and everything contained in it,
    /// contained objects first. Returns the number of records staged.
    pub async fn delete_cascade(&mut self, id: &ObjectId) -> ConsoleResult<usize> {
        let objects = self.list_for(id.kind(), "delete").await?;
        let mut staged = BTreeSet::new();
        let mut records = Vec::new();
        stage_cascade(id, &objects, &mut staged, &mut records);

        let nr = records.len();
        debug!("Staging deletion of {} with {} dependent deletions", id, nr - 1);
        self.log.extend(records)?;
        Ok(nr)
    }

    /// Stages the cascading deletion of every object of the given kind that
    /// matches the predicate. Returns the number of records staged, which
    /// is zero if nothing matched.
    pub async fn delete_matching<F>(&mut self, kind: ObjectKind, predicate: F) -> ConsoleResult<usize>
    where
        F: Fn(&ConfigObject) -> bool,
    {
        let objects = self.list_for(kind, "delete").await?;
        let mut staged = BTreeSet::new();
        let mut records = Vec::new();
        for object in objects.iter().filter(|o| o.kind() == kind && predicate(o)) {
            stage_cascade(object.id(), &objects, &mut staged, &mut records);
        }

        let nr = records.len();
        self.log.extend(records)?;
        Ok(nr)
    }

    /// Stages the removal of `member` from every object of the given kind
    /// that has it. Returns the number of records staged, which is zero if
    /// no object had the member.
    pub async fn remove_member_everywhere(&mut self, kind: ObjectKind, member: &str) -> ConsoleResult<usize> {
        let objects = self.list_for(kind, "remove member").await?;
        let records: Vec<_> = objects
            .iter()
            .filter(|o| o.kind() == kind && o.has_member(member))
            .map(|o| ActionRecord::new(o.id().clone(), Operation::remove_member(member)))
            .collect();

        let nr = records.len();
        self.log.extend(records)?;
        Ok(nr)
    }

    /// Lists the objects of the kind's domain, plus those of any domain
    /// holding objects contained in this kind.
    async fn list_for(&self, kind: ObjectKind, operation: &str) -> ConsoleResult<Vec<ConfigObject>> {
        let mut domains = vec![kind.domain()];
        for contained in ObjectKind::ALL.iter().filter(|k| k.container() == Some(kind)) {
            if !domains.contains(&contained.domain()) {
                domains.push(contained.domain());
            }
        }

        let mut objects = Vec::new();
        for domain in domains {
            let listed = self
                .authority
                .list(domain)
                .await
                .map_err(|e| Error::staging(format!("{operation} {kind}"), e))?;
            objects.extend(listed);
        }
        Ok(objects)
    }
}

/// Adds delete records for `id` and, before it, for everything contained in
/// it. Objects already in `staged` are skipped.
fn stage_cascade(
    id: &ObjectId,
    objects: &[ConfigObject],
    staged: &mut BTreeSet<ObjectId>,
    records: &mut Vec<ActionRecord>,
) {
    if staged.contains(id) {
        return;
    }
    for child in objects.iter().filter(|o| o.parent() == Some(id)) {
        stage_cascade(child.id(), objects, staged, records);
    }
    staged.insert(id.clone());
    records.push(ActionRecord::new(id.clone(), Operation::Delete));
}

//------------ Transaction ---------------------------------------------------

/// An editor session that owns its log.
///
/// Records staged through [`Transaction::editor`] are either committed
/// together or discarded together. A transaction that is dropped with
/// pending records discards them.
pub struct Transaction {
    authority: Arc<dyn RemoteAuthority>,
    log: ActionLog,
}

impl Transaction {
    pub fn begin(authority: Arc<dyn RemoteAuthority>) -> Self {
        Transaction {
            authority,
            log: ActionLog::new(),
        }
    }

    pub fn editor(&mut self) -> Editor<'_> {
        Editor::shared(self.authority.clone(), &mut self.log)
    }

    pub fn has_pending(&self) -> bool {
        self.log.has_pending()
    }

    pub fn staged(&self) -> usize {
        self.log.len()
    }

    /// Drains the log and submits it to the authority. An empty log is not
    /// submitted. On failure the records are gone: the transaction counts
    /// as rolled back.
    ///
    /// This does not notify anyone. Use a manager to commit when observers
    /// need to hear about the change.
    pub async fn commit(mut self) -> ConsoleResult<Vec<ActionRecord>> {
        let records = self.log.drain();
        self.log.close();

        if records.is_empty() {
            debug!("Nothing staged, skipping commit");
            return Ok(records);
        }

        self.authority.apply_atomically(&records).await.map_err(Error::Commit)?;
        Ok(records)
    }

    /// Discards the staged records, returning how many there were.
    pub fn rollback(mut self) -> usize {
        self.log.close();
        self.log.discard()
    }

    /// Takes the log out of this transaction, leaving an empty one behind.
    pub(crate) fn take_log(&mut self) -> ActionLog {
        std::mem::take(&mut self.log)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.log.has_pending() {
            warn!("Discarding {} uncommitted records", self.log.discard());
        }
    }
}

//------------ Tests ---------------------------------------------------------
