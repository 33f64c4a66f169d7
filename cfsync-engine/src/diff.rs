//! Replace-versus-update decisions for a computed change.

/// A changed field forces replacement only when its force flag is set.
pub fn requires_replacement(changed: bool, force: bool) -> bool {
    changed && force
}

/// How a change to one field is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Always mutated in place.
    InPlace,
    /// Mutated in place unless the resource opts into replacement.
    ReplaceWhenFlagged,
    /// The remote cannot change it; any change replaces the resource.
    AlwaysReplace,
}

/// One field of a computed diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub changed: bool,
    /// The force-replace flag governing this field, if the user set one.
    pub force: Option<bool>,
}

impl FieldChange {
    pub fn new(field: &'static str, changed: bool) -> Self {
        Self {
            field,
            changed,
            force: None,
        }
    }

    pub fn forced_by(mut self, flag: bool) -> Self {
        self.force = Some(flag);
        self
    }
}

/// What the reconciler must do with a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangePlan {
    Unchanged,
    /// Update in place; lists the changed fields.
    InPlace(Vec<&'static str>),
    /// Delete and recreate; lists the fields that force it.
    Replace(Vec<&'static str>),
}

/// Per-resource-kind table of field policies.
#[derive(Debug, Clone, Copy)]
pub struct DiffPolicy {
    fields: &'static [(&'static str, FieldPolicy)],
}

impl DiffPolicy {
    pub const fn new(fields: &'static [(&'static str, FieldPolicy)]) -> Self {
        Self { fields }
    }

    /// Policy for a field. Fields the table does not name are in place.
    pub fn policy(&self, field: &str) -> FieldPolicy {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, policy)| *policy)
            .unwrap_or(FieldPolicy::InPlace)
    }

    /// A missing force flag means no forced replacement.
    pub fn requires_replacement(&self, field: &str, changed: bool, force: Option<bool>) -> bool {
        match self.policy(field) {
            FieldPolicy::InPlace => false,
            FieldPolicy::ReplaceWhenFlagged => requires_replacement(changed, force.unwrap_or(false)),
            FieldPolicy::AlwaysReplace => changed,
        }
    }

    pub fn plan(&self, changes: &[FieldChange]) -> ChangePlan {
        let replacing: Vec<_> = changes
            .iter()
            .filter(|c| self.requires_replacement(c.field, c.changed, c.force))
            .map(|c| c.field)
            .collect();
        if !replacing.is_empty() {
            return ChangePlan::Replace(replacing);
        }

        let changed: Vec<_> = changes
            .iter()
            .filter(|c| c.changed)
            .map(|c| c.field)
            .collect();
        if changed.is_empty() {
            ChangePlan::Unchanged
        } else {
            ChangePlan::InPlace(changed)
        }
    }
}
