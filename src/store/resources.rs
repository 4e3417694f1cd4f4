use tracing::debug;
use uuid::Uuid;

use super::objects::ObjectManager;
use crate::error::{Error, Result};
use crate::types::{CatalogObject, DirectoryEntry, ObjectKind, RequestContext};

fn require_directory(directory_id: Uuid) -> Result<()> {
    if directory_id.is_nil() {
        return Err(Error::invalid_input("invalid directory ID"));
    }
    Ok(())
}

// Kind-generic entry operations behind the Resource and SkillSet wrappers.
impl ObjectManager<'_> {
    pub fn upsert_entry(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        ctx.tenant_id()?;
        require_directory(directory_id)?;
        self.add_or_update_object_by_path(ctx, kind, directory_id, &entry.path, &entry.to_ref())
    }

    /// Stores the object, then points the entry at it.
    ///
    /// The two steps are not one transaction. The object is always written first, so
    /// a failure in between can orphan an object but never leaves an entry pointing
    /// at a missing one. An object that already exists is reused.
    pub fn upsert_entry_object(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        entry: &DirectoryEntry,
        obj: &CatalogObject,
    ) -> Result<()> {
        ctx.tenant_id()?;
        require_directory(directory_id)?;
        if obj.kind != kind {
            return Err(Error::invalid_input(format!(
                "object is a {}, expected a {kind}",
                obj.kind
            )));
        }
        if obj.hash != entry.hash {
            return Err(Error::invalid_input("entry hash does not match object hash"));
        }

        match self.create_catalog_object(ctx, obj) {
            Ok(()) => {}
            Err(Error::AlreadyExists(_)) => {
                debug!(hash = %obj.hash, "Reusing existing catalog object");
            }
            Err(e) => return Err(e),
        }

        self.add_or_update_object_by_path(ctx, kind, directory_id, &entry.path, &entry.to_ref())
    }

    pub fn get_entry(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        path: &str,
    ) -> Result<DirectoryEntry> {
        require_directory(directory_id)?;
        let obj_ref = self.get_object_ref_by_path(ctx, kind, directory_id, path)?;
        Ok(DirectoryEntry::from_ref(path, obj_ref))
    }

    /// Rewrites an entry that must already exist.
    pub fn update_entry(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        require_directory(directory_id)?;
        if !self.path_exists(ctx, kind, directory_id, &entry.path)? {
            return Err(Error::not_found(format!("{kind} at {}", entry.path)));
        }
        self.add_or_update_object_by_path(ctx, kind, directory_id, &entry.path, &entry.to_ref())
    }

    pub fn list_entries(
        &self,
        ctx: &RequestContext,
        kind: ObjectKind,
        directory_id: Uuid,
    ) -> Result<Vec<DirectoryEntry>> {
        require_directory(directory_id)?;
        let dir = self.get_schema_directory(ctx, kind, directory_id)?;
        Ok(dir
            .directory
            .into_iter()
            .map(|(path, obj_ref)| DirectoryEntry::from_ref(path, obj_ref))
            .collect())
    }
}

// Resource operations
impl ObjectManager<'_> {
    pub fn upsert_resource(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        self.upsert_entry(ctx, ObjectKind::Resource, directory_id, entry)
    }

    pub fn upsert_resource_object(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
        obj: &CatalogObject,
    ) -> Result<()> {
        self.upsert_entry_object(ctx, ObjectKind::Resource, directory_id, entry, obj)
    }

    pub fn get_resource(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<DirectoryEntry> {
        self.get_entry(ctx, ObjectKind::Resource, directory_id, path)
    }

    pub fn get_resource_object(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<CatalogObject> {
        require_directory(directory_id)?;
        self.load_object_by_path(ctx, ObjectKind::Resource, directory_id, path)
    }

    pub fn update_resource(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        self.update_entry(ctx, ObjectKind::Resource, directory_id, entry)
    }

    pub fn delete_resource(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<Option<String>> {
        require_directory(directory_id)?;
        self.delete_object_by_path(ctx, ObjectKind::Resource, directory_id, path)
    }

    pub fn list_resources(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
    ) -> Result<Vec<DirectoryEntry>> {
        self.list_entries(ctx, ObjectKind::Resource, directory_id)
    }
}

// SkillSet operations
impl ObjectManager<'_> {
    pub fn upsert_skillset(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        self.upsert_entry(ctx, ObjectKind::SkillSet, directory_id, entry)
    }

    pub fn upsert_skillset_object(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
        obj: &CatalogObject,
    ) -> Result<()> {
        self.upsert_entry_object(ctx, ObjectKind::SkillSet, directory_id, entry, obj)
    }

    pub fn get_skillset(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<DirectoryEntry> {
        self.get_entry(ctx, ObjectKind::SkillSet, directory_id, path)
    }

    pub fn get_skillset_object(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<CatalogObject> {
        require_directory(directory_id)?;
        self.load_object_by_path(ctx, ObjectKind::SkillSet, directory_id, path)
    }

    pub fn update_skillset(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        entry: &DirectoryEntry,
    ) -> Result<()> {
        self.update_entry(ctx, ObjectKind::SkillSet, directory_id, entry)
    }

    pub fn delete_skillset(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
        path: &str,
    ) -> Result<Option<String>> {
        require_directory(directory_id)?;
        self.delete_object_by_path(ctx, ObjectKind::SkillSet, directory_id, path)
    }

    pub fn list_skillsets(
        &self,
        ctx: &RequestContext,
        directory_id: Uuid,
    ) -> Result<Vec<DirectoryEntry>> {
        self.list_entries(ctx, ObjectKind::SkillSet, directory_id)
    }
}
