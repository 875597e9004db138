use crate::error::{IndexerError, IndexerResult};
use crate::types::{BlockHeight, Entity, FieldValue};

/// One value of an entity together with the half-open height range over which
/// it is valid. `end_height = None` means live at tip.
#[derive(Debug, Clone)]
pub struct EntityVersion<E> {
    pub data: E,
    pub start_height: BlockHeight,
    pub end_height: Option<BlockHeight>,
}

/// Pending version history for a single entity id.
///
/// Versions are kept sorted by `start_height`, ranges never overlap, and at
/// most one version is open.
#[derive(Debug, Clone, Default)]
pub struct SetValueModel<E> {
    versions: Vec<EntityVersion<E>>,
}

impl<E: Entity> SetValueModel<E> {
    pub fn new(data: E, height: BlockHeight) -> Self {
        Self {
            versions: vec![EntityVersion {
                data,
                start_height: height,
                end_height: None,
            }],
        }
    }

    /// Closes the open version at `height` (if any) and appends a new open
    /// version. A set at the open version's own start height replaces it in
    /// place instead of producing a zero-width interval. Setting below the
    /// last start height is a programmer error.
    pub fn set(&mut self, data: E, height: BlockHeight) -> IndexerResult<()> {
        let Some(last) = self.versions.last_mut() else {
            self.versions.push(EntityVersion {
                data,
                start_height: height,
                end_height: None,
            });
            return Ok(());
        };

        if height < last.start_height {
            return Err(IndexerError::NonMonotonicVersion {
                id: data.id().to_string(),
                height,
                last_start: last.start_height,
            });
        }

        if height == last.start_height && last.end_height.is_none() {
            last.data = data;
            return Ok(());
        }

        if last.end_height.is_none() {
            last.end_height = Some(height);
        }
        self.versions.push(EntityVersion {
            data,
            start_height: height,
            end_height: None,
        });
        Ok(())
    }

    /// Closes the open version at `height` without opening a new one.
    pub fn mark_removed(&mut self, height: BlockHeight) {
        if let Some(last) = self.versions.last_mut() {
            if last.end_height.is_none() {
                last.end_height = Some(height);
            }
        }
    }

    pub fn latest(&self) -> Option<&EntityVersion<E>> {
        self.versions.last()
    }

    pub fn first(&self) -> Option<&EntityVersion<E>> {
        self.versions.first()
    }

    pub fn versions(&self) -> &[EntityVersion<E>] {
        &self.versions
    }

    pub fn first_start_height(&self) -> Option<BlockHeight> {
        self.versions.first().map(|v| v.start_height)
    }

    /// True iff the latest version's `field` equals `value`. A `None` field
    /// matches any version.
    pub fn matches_field(&self, field: Option<&str>, value: &FieldValue) -> bool {
        let Some(latest) = self.versions.last() else {
            return false;
        };
        match field {
            None => true,
            Some(name) => latest.data.field(name).as_ref() == Some(value),
        }
    }
}
