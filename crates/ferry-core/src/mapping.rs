//! Source-id → destination-id maps for people and projects.
//!
//! Each map fetches both trackers' lists once. Explicit name overrides
//! (`--user "Ann Smith:Ann S."`) pin a source entity to an existing
//! destination one; every other entity is created in the destination the
//! first time replay needs it, and the created id is cached.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::MigrateError;
use crate::transport::{Params, Transport, scalar_text};

/// Describes one kind of mapped entity on the tracker API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityKind {
    /// Singular noun for messages.
    pub noun: &'static str,
    pub id_field: &'static str,
    pub name_field: &'static str,
    /// Columns copied into the create command besides the name.
    pub extra_columns: &'static [&'static str],
    pub list_command: &'static str,
    pub create_command: &'static str,
    /// Key of the listed items in a list response.
    pub collection: &'static str,
}

impl EntityKind {
    pub const PEOPLE: Self = Self {
        noun: "person",
        id_field: "ixPerson",
        name_field: "sFullName",
        extra_columns: &["sEmail"],
        list_command: "listPeople",
        create_command: "newPerson",
        collection: "people",
    };

    pub const PROJECTS: Self = Self {
        noun: "project",
        id_field: "ixProject",
        name_field: "sProject",
        extra_columns: &["ixPersonOwner"],
        list_command: "listProjects",
        create_command: "newProject",
        collection: "projects",
    };

    /// Keep only this kind's columns, as strings.
    fn record(&self, item: &Value) -> Params {
        [self.id_field, self.name_field]
            .iter()
            .chain(self.extra_columns)
            .filter_map(|column| {
                item.get(*column)
                    .and_then(scalar_text)
                    .map(|value| ((*column).to_string(), value))
            })
            .collect()
    }

    fn fetch(&self, transport: &mut dyn Transport) -> Result<Vec<Params>, MigrateError> {
        let response = transport.execute(self.list_command, &Params::new(), &[])?;
        Ok(response
            .list(self.collection)
            .iter()
            .map(|item| self.record(item))
            .collect())
    }
}

/// Lazily built source-id → destination-id cache for one entity kind.
#[derive(Debug, Clone)]
pub struct IdMap {
    kind: EntityKind,
    source_items: Vec<Params>,
    lookup: HashMap<String, String>,
    /// Destination name → id, including entities created by name.
    dest_names: BTreeMap<String, String>,
    created: usize,
}

impl IdMap {
    /// Fetch both lists and resolve `overrides` (source name → dest name).
    ///
    /// # Errors
    ///
    /// Transport failures, or [`MigrateError::UnknownName`] if an override
    /// names an entity missing on either side.
    pub fn load(
        kind: EntityKind,
        overrides: &BTreeMap<String, String>,
        source: &mut dyn Transport,
        dest: &mut dyn Transport,
    ) -> Result<Self, MigrateError> {
        let source_items = kind.fetch(source)?;
        let dest_items = kind.fetch(dest)?;
        debug!(
            kind = kind.noun,
            source = source_items.len(),
            dest = dest_items.len(),
            "fetched entity lists"
        );
        Self::from_parts(kind, overrides, source_items, &dest_items)
    }

    /// Build from already fetched lists.
    ///
    /// # Errors
    ///
    /// [`MigrateError::UnknownName`] for an unresolvable override.
    pub fn from_parts(
        kind: EntityKind,
        overrides: &BTreeMap<String, String>,
        source_items: Vec<Params>,
        dest_items: &[Params],
    ) -> Result<Self, MigrateError> {
        let source_ids = names_to_ids(&kind, &source_items);
        let dest_ids = names_to_ids(&kind, dest_items);

        let mut lookup = HashMap::new();
        for (source_name, dest_name) in overrides {
            let source_ix = resolve(&kind, "source", &source_ids, source_name)?;
            let dest_ix = resolve(&kind, "dest", &dest_ids, dest_name)?;
            lookup.insert(source_ix, dest_ix);
        }

        Ok(Self {
            kind,
            source_items,
            lookup,
            dest_names: dest_ids,
            created: 0,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Number of destination entities this map has created.
    #[must_use]
    pub const fn created(&self) -> usize {
        self.created
    }

    /// Source id of the entity listed under `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&str> {
        self.source_items
            .iter()
            .find(|item| item.get(self.kind.name_field).map(String::as_str) == Some(name))
            .and_then(|item| item.get(self.kind.id_field))
            .map(String::as_str)
    }

    /// Names listed by the source, for error messages.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.source_items
            .iter()
            .filter_map(|item| item.get(self.kind.name_field).cloned())
            .collect()
    }

    /// Destination id of the entity called `name` there, creating it with
    /// just its name if the destination has none.
    ///
    /// # Errors
    ///
    /// Transport failures from the create command.
    pub fn get_or_create_dest(
        &mut self,
        name: &str,
        dest: &mut dyn Transport,
    ) -> Result<String, MigrateError> {
        if let Some(dest_id) = self.dest_names.get(name) {
            return Ok(dest_id.clone());
        }
        let mut params = Params::new();
        params.insert(self.kind.name_field.to_string(), name.to_string());
        let response = dest.execute(self.kind.create_command, &params, &[])?;
        let dest_id = response.created_id(self.kind.id_field)?;
        info!(kind = self.kind.noun, name, dest = %dest_id, "created missing destination entity");
        self.dest_names.insert(name.to_string(), dest_id.clone());
        self.created += 1;
        Ok(dest_id)
    }

    /// Remember a source entity found outside the initial list.
    pub fn push_source(&mut self, item: &Value) {
        self.source_items.push(self.kind.record(item));
    }

    /// Destination id for `source_id`, creating the entity on first use.
    ///
    /// `adjust` rewrites the create parameters before they are sent.
    ///
    /// # Errors
    ///
    /// [`MigrateError::EntityNotFound`] if the source never listed
    /// `source_id`; transport failures from the create command.
    pub fn get_ix<F>(
        &mut self,
        source_id: &str,
        dest: &mut dyn Transport,
        adjust: F,
    ) -> Result<String, MigrateError>
    where
        F: FnOnce(&mut Params, &mut dyn Transport) -> Result<(), MigrateError>,
    {
        if let Some(dest_id) = self.lookup.get(source_id) {
            return Ok(dest_id.clone());
        }

        let id_field = self.kind.id_field;
        let Some(item) = self
            .source_items
            .iter()
            .find(|item| item.get(id_field).map(String::as_str) == Some(source_id))
        else {
            return Err(MigrateError::EntityNotFound {
                kind: self.kind.noun,
                id: source_id.to_string(),
                known: self
                    .source_items
                    .iter()
                    .filter_map(|item| item.get(id_field).cloned())
                    .collect(),
            });
        };

        let mut params = item.clone();
        params.remove(id_field);
        adjust(&mut params, &mut *dest)?;

        let response = dest.execute(self.kind.create_command, &params, &[])?;
        let dest_id = response.created_id(id_field)?;
        debug!(
            kind = self.kind.noun,
            source = source_id,
            dest = %dest_id,
            "created {}",
            self.kind.create_command
        );
        self.lookup.insert(source_id.to_string(), dest_id.clone());
        self.created += 1;
        Ok(dest_id)
    }
}

fn names_to_ids(kind: &EntityKind, items: &[Params]) -> BTreeMap<String, String> {
    items
        .iter()
        .filter_map(|item| {
            Some((
                item.get(kind.name_field)?.clone(),
                item.get(kind.id_field)?.clone(),
            ))
        })
        .collect()
}

fn resolve(
    kind: &EntityKind,
    side: &'static str,
    ids: &BTreeMap<String, String>,
    name: &str,
) -> Result<String, MigrateError> {
    ids.get(name).cloned().ok_or_else(|| MigrateError::UnknownName {
        side,
        kind: kind.noun,
        name: name.to_string(),
        known: ids.keys().cloned().collect(),
    })
}

/// People map; the system actor passes through untranslated.
#[derive(Debug, Clone)]
pub struct UserMap {
    map: IdMap,
    system_actor: String,
    unassigned: Option<String>,
}

impl UserMap {
    /// # Errors
    ///
    /// See [`IdMap::load`].
    pub fn load(
        overrides: &BTreeMap<String, String>,
        system_actor: impl Into<String>,
        source: &mut dyn Transport,
        dest: &mut dyn Transport,
    ) -> Result<Self, MigrateError> {
        Ok(Self::new(
            IdMap::load(EntityKind::PEOPLE, overrides, source, dest)?,
            system_actor,
        ))
    }

    #[must_use]
    pub fn new(map: IdMap, system_actor: impl Into<String>) -> Self {
        Self {
            map,
            system_actor: system_actor.into(),
            unassigned: None,
        }
    }

    /// Assign cases that have no assignee to the source person `name`.
    ///
    /// # Errors
    ///
    /// [`MigrateError::UnknownName`] if the source lists nobody by that name.
    pub fn set_unassigned(&mut self, name: &str) -> Result<(), MigrateError> {
        let source_id = self.map.find_by_name(name).ok_or_else(|| MigrateError::UnknownName {
            side: "source",
            kind: self.map.kind().noun,
            name: name.to_string(),
            known: self.map.source_names(),
        })?;
        self.unassigned = Some(source_id.to_string());
        Ok(())
    }

    /// Source id standing in for "no assignee", if one was set.
    #[must_use]
    pub fn unassigned(&self) -> Option<&str> {
        self.unassigned.as_deref()
    }

    #[must_use]
    pub fn is_system_actor(&self, source_id: &str) -> bool {
        source_id == self.system_actor
    }

    /// # Errors
    ///
    /// See [`IdMap::get_ix`].
    pub fn get_ixperson(
        &mut self,
        source_id: &str,
        dest: &mut dyn Transport,
    ) -> Result<String, MigrateError> {
        if self.is_system_actor(source_id) {
            return Ok(source_id.to_string());
        }
        self.map.get_ix(source_id, dest, |_, _| Ok(()))
    }

    #[must_use]
    pub const fn created(&self) -> usize {
        self.map.created()
    }
}

/// Projects map; replay references projects by name.
#[derive(Debug, Clone)]
pub struct ProjectMap {
    map: IdMap,
    probe_limit: u32,
}

impl ProjectMap {
    /// # Errors
    ///
    /// See [`IdMap::load`].
    pub fn load(
        overrides: &BTreeMap<String, String>,
        probe_limit: u32,
        source: &mut dyn Transport,
        dest: &mut dyn Transport,
    ) -> Result<Self, MigrateError> {
        Ok(Self::new(
            IdMap::load(EntityKind::PROJECTS, overrides, source, dest)?,
            probe_limit,
        ))
    }

    #[must_use]
    pub const fn new(map: IdMap, probe_limit: u32) -> Self {
        Self { map, probe_limit }
    }

    #[must_use]
    pub const fn created(&self) -> usize {
        self.map.created()
    }

    /// Destination id of the source project called `name`.
    ///
    /// A name the source list lacks usually belongs to a deleted project;
    /// those are found by probing `listProjects` one id at a time, up to
    /// the probe limit.
    ///
    /// # Errors
    ///
    /// [`MigrateError::UnrecoverableEntity`] when probing finds nothing,
    /// plus any [`IdMap::get_ix`] failure.
    pub fn get_project(
        &mut self,
        name: &str,
        users: &mut UserMap,
        source: &mut dyn Transport,
        dest: &mut dyn Transport,
    ) -> Result<String, MigrateError> {
        if let Some(source_id) = self.map.find_by_name(name).map(str::to_string) {
            return self.ix(&source_id, users, dest);
        }

        warn!(
            project = name,
            known = %self.map.source_names().join(", "),
            "source project not listed; has it been deleted?"
        );
        info!(limit = self.probe_limit, "probing source projects by id");
        for ix in 0..self.probe_limit {
            let ix = ix.to_string();
            debug!(ix_project = %ix, "probing");
            let mut params = Params::new();
            params.insert("ixProject".into(), ix.clone());
            let response = source.execute("listProjects", &params, &[])?;

            let found = response.list("projects").iter().find(|project| {
                project.get("sProject").and_then(Value::as_str) == Some(name)
            });
            if let Some(project) = found {
                info!(project = name, ix_project = %ix, "found deleted project");
                self.map.push_source(project);
                let source_id = project
                    .get("ixProject")
                    .and_then(scalar_text)
                    .unwrap_or(ix);
                return self.ix(&source_id, users, dest);
            }
        }

        Err(MigrateError::UnrecoverableEntity {
            kind: "project",
            name: name.to_string(),
            probed: self.probe_limit,
        })
    }

    /// Destination id of the destination project `name`, created on first
    /// use when missing.
    ///
    /// # Errors
    ///
    /// See [`IdMap::get_or_create_dest`].
    pub fn get_dest_project(
        &mut self,
        name: &str,
        dest: &mut dyn Transport,
    ) -> Result<String, MigrateError> {
        self.map.get_or_create_dest(name, dest)
    }

    /// Create or look up by source id; owners become primary contacts.
    fn ix(
        &mut self,
        source_id: &str,
        users: &mut UserMap,
        dest: &mut dyn Transport,
    ) -> Result<String, MigrateError> {
        self.map.get_ix(source_id, dest, |params, dest| {
            if let Some(owner) = params.remove("ixPersonOwner") {
                let contact = users.get_ixperson(&owner, dest)?;
                params.insert("ixPersonPrimaryContact".into(), contact);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;

    fn source() -> MemoryTransport {
        MemoryTransport::new("source")
            .with_response(
                "listPeople",
                json!({"people": [
                    {"ixPerson": 2, "sFullName": "Ann Smith", "sEmail": "ann@example.com"},
                    {"ixPerson": 3, "sFullName": "Bo Chen", "sEmail": "bo@example.com"}
                ]}),
            )
            .with_response(
                "listProjects",
                json!({"projects": [
                    {"ixProject": 1, "sProject": "Inbox", "ixPersonOwner": 3}
                ]}),
            )
    }

    fn dest() -> MemoryTransport {
        MemoryTransport::new("destination")
            .with_response(
                "listPeople",
                json!({"people": [{"ixPerson": 11, "sFullName": "Ann S."}]}),
            )
            .with_response("listProjects", json!({"projects": []}))
    }

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
            .collect()
    }

    #[test]
    fn override_maps_without_creating() {
        let (mut src, mut dst) = (source(), dest());
        let mut users =
            UserMap::load(&overrides(&[("Ann Smith", "Ann S.")]), "-1", &mut src, &mut dst)
                .unwrap();
        assert_eq!(users.get_ixperson("2", &mut dst).unwrap(), "11");
        assert_eq!(users.created(), 0);
        assert!(!dst.commands().contains(&"newPerson"));
    }

    #[test]
    fn unknown_override_lists_names() {
        let (mut src, mut dst) = (source(), dest());
        let err = UserMap::load(&overrides(&[("Ann Smith", "Nobody")]), "-1", &mut src, &mut dst)
            .unwrap_err();
        match err {
            MigrateError::UnknownName {
                side, name, known, ..
            } => {
                assert_eq!(side, "dest");
                assert_eq!(name, "Nobody");
                assert_eq!(known, vec!["Ann S.".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_lookup_creates_once() {
        let (mut src, mut dst) = (source(), dest());
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        let first = users.get_ixperson("3", &mut dst).unwrap();
        let second = users.get_ixperson("3", &mut dst).unwrap();
        assert_eq!(first, second);
        assert_eq!(users.created(), 1);

        let creates: Vec<_> = dst
            .calls()
            .iter()
            .filter(|c| c.command == "newPerson")
            .collect();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].params["sFullName"], "Bo Chen");
        assert_eq!(creates[0].params["sEmail"], "bo@example.com");
        assert!(!creates[0].params.contains_key("ixPerson"));
    }

    #[test]
    fn system_actor_passes_through() {
        let (mut src, mut dst) = (source(), dest());
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        assert_eq!(users.get_ixperson("-1", &mut dst).unwrap(), "-1");
        assert_eq!(users.created(), 0);
    }

    #[test]
    fn unknown_source_id_lists_known_ids() {
        let (mut src, mut dst) = (source(), dest());
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        match users.get_ixperson("99", &mut dst).unwrap_err() {
            MigrateError::EntityNotFound { id, known, .. } => {
                assert_eq!(id, "99");
                assert_eq!(known, vec!["2".to_string(), "3".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn project_owner_becomes_primary_contact() {
        let (mut src, mut dst) = (source(), dest());
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        let mut projects = ProjectMap::load(&BTreeMap::new(), 100, &mut src, &mut dst).unwrap();

        let ix = projects
            .get_project("Inbox", &mut users, &mut src, &mut dst)
            .unwrap();
        assert_eq!(ix, "1");

        let create = dst
            .calls()
            .iter()
            .find(|c| c.command == "newProject")
            .unwrap();
        assert_eq!(create.params["sProject"], "Inbox");
        assert_eq!(create.params["ixPersonPrimaryContact"], "1");
        assert!(!create.params.contains_key("ixPersonOwner"));
        assert_eq!(users.created(), 1);
    }

    /// Source whose `listProjects` answers by id, like the live tracker.
    struct ProbingSource {
        inner: MemoryTransport,
        deleted_at: u32,
    }

    impl Transport for ProbingSource {
        fn name(&self) -> &str {
            "source"
        }

        fn execute(
            &mut self,
            command: &str,
            params: &Params,
            uploads: &[crate::transport::Upload],
        ) -> Result<crate::transport::Response, crate::transport::TransportError> {
            if command == "listProjects"
                && let Some(ix) = params.get("ixProject")
            {
                self.inner.execute(command, params, uploads)?;
                let body = if *ix == self.deleted_at.to_string() {
                    json!({"projects": [{"ixProject": self.deleted_at, "sProject": "Old"}]})
                } else {
                    json!({"projects": []})
                };
                return crate::transport::Response::from_body("source", command, body);
            }
            self.inner.execute(command, params, uploads)
        }

        fn fetch_attachment(
            &mut self,
            url: &str,
        ) -> Result<Vec<u8>, crate::transport::TransportError> {
            self.inner.fetch_attachment(url)
        }
    }

    #[test]
    fn deleted_project_is_found_by_probing() {
        let mut src = ProbingSource {
            inner: source(),
            deleted_at: 4,
        };
        let mut dst = dest();
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        let mut projects = ProjectMap::load(&BTreeMap::new(), 100, &mut src, &mut dst).unwrap();

        let ix = projects
            .get_project("Old", &mut users, &mut src, &mut dst)
            .unwrap();
        assert_eq!(ix, "1");
        let probes = src
            .inner
            .calls()
            .iter()
            .filter(|c| c.params.contains_key("ixProject"))
            .count();
        assert_eq!(probes, 5);

        // Found once, then served from the cache.
        projects
            .get_project("Old", &mut users, &mut src, &mut dst)
            .unwrap();
        assert_eq!(projects.created(), 1);
    }

    #[test]
    fn exhausted_probe_is_unrecoverable() {
        let mut src = ProbingSource {
            inner: source(),
            deleted_at: 50,
        };
        let mut dst = dest();
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        let mut projects = ProjectMap::load(&BTreeMap::new(), 10, &mut src, &mut dst).unwrap();

        let err = projects
            .get_project("Old", &mut users, &mut src, &mut dst)
            .unwrap_err();
        assert!(matches!(
            err,
            MigrateError::UnrecoverableEntity { probed: 10, .. }
        ));
    }

    #[test]
    fn destination_project_is_created_once_by_name() {
        let (mut src, mut dst) = (source(), dest());
        let mut projects = ProjectMap::load(&BTreeMap::new(), 10, &mut src, &mut dst).unwrap();

        let first = projects.get_dest_project("Imported", &mut dst).unwrap();
        let again = projects.get_dest_project("Imported", &mut dst).unwrap();
        assert_eq!(first, again);
        assert_eq!(projects.created(), 1);
        let creates: Vec<_> = dst
            .calls()
            .iter()
            .filter(|c| c.command == "newProject")
            .map(|c| c.params["sProject"].clone())
            .collect();
        assert_eq!(creates, vec!["Imported".to_string()]);
    }

    #[test]
    fn existing_destination_project_is_reused() {
        let mut src = source();
        let mut dst = dest().with_response(
            "listProjects",
            json!({"projects": [{"ixProject": 8, "sProject": "Web"}]}),
        );
        let mut projects = ProjectMap::load(&BTreeMap::new(), 10, &mut src, &mut dst).unwrap();

        assert_eq!(projects.get_dest_project("Web", &mut dst).unwrap(), "8");
        assert_eq!(projects.created(), 0);
        assert!(!dst.commands().contains(&"newProject"));
    }

    #[test]
    fn unassigned_user_resolves_to_source_id() {
        let (mut src, mut dst) = (source(), dest());
        let mut users = UserMap::load(&BTreeMap::new(), "-1", &mut src, &mut dst).unwrap();
        assert_eq!(users.unassigned(), None);

        users.set_unassigned("Bo Chen").unwrap();
        assert_eq!(users.unassigned(), Some("3"));

        let err = users.set_unassigned("Nobody").unwrap_err();
        assert!(matches!(
            err,
            MigrateError::UnknownName { side: "source", .. }
        ));
    }
}
