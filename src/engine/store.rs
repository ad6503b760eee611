use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::StoreError;

/// Storage collaborator. Returns domain entities only; the engine never sees
/// how they are persisted.
///
/// Implementations need not serialize writes: the ledger holds a per-resource
/// lock around every check-then-write.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn resource(&self, id: Ulid) -> Result<Option<ResourceProfile>, StoreError>;

    async fn resources(&self) -> Result<Vec<ResourceProfile>, StoreError>;

    /// All reservations on `resource_id` whose span overlaps `span`, any status.
    async fn reservations_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Vec<ReservationInstance>, StoreError>;

    async fn blocks_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Vec<Block>, StoreError>;

    async fn reservation(&self, id: Ulid) -> Result<Option<ReservationInstance>, StoreError>;

    async fn insert_reservation(&self, reservation: ReservationInstance) -> Result<(), StoreError>;

    /// Replace a stored reservation (matched by id).
    async fn update_reservation(&self, reservation: ReservationInstance) -> Result<(), StoreError>;

    /// Hard delete. Only used to roll back a batch that never became visible
    /// as a whole.
    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError>;

    async fn insert_block(&self, block: Block) -> Result<(), StoreError>;

    async fn delete_block(&self, id: Ulid) -> Result<Block, StoreError>;
}

/// Everything stored for one resource. Both lists are sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub profile: ResourceProfile,
    pub reservations: Vec<ReservationInstance>,
    pub blocks: Vec<Block>,
}

impl ResourceState {
    pub fn new(profile: ResourceProfile) -> Self {
        Self {
            profile,
            reservations: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn insert_reservation(&mut self, r: ReservationInstance) {
        let pos = self
            .reservations
            .binary_search_by_key(&r.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, r);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<ReservationInstance> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn insert_block(&mut self, b: Block) {
        let pos = self
            .blocks
            .binary_search_by_key(&b.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.blocks.insert(pos, b);
    }

    pub fn remove_block(&mut self, id: Ulid) -> Option<Block> {
        let pos = self.blocks.iter().position(|b| b.id == id)?;
        Some(self.blocks.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn reservations_overlapping(&self, query: &Span) -> impl Iterator<Item = &ReservationInstance> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn blocks_overlapping(&self, query: &Span) -> impl Iterator<Item = &Block> {
        let right_bound = self.blocks.partition_point(|b| b.span.start < query.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Process-local store. Reservation and block ids are indexed back to their
/// resource so point lookups don't scan.
pub struct InMemoryStore {
    resources: DashMap<Ulid, SharedResourceState>,
    entity_to_resource: DashMap<Ulid, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            entity_to_resource: DashMap::new(),
        }
    }

    pub fn add_resource(&self, profile: ResourceProfile) {
        let id = profile.id;
        self.resources
            .insert(id, Arc::new(RwLock::new(ResourceState::new(profile))));
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    fn resource_of(&self, entity_id: &Ulid) -> Result<SharedResourceState, StoreError> {
        let rid = self
            .entity_to_resource
            .get(entity_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*entity_id))?;
        self.get_resource(&rid).ok_or(StoreError::NotFound(rid))
    }

    /// Every reservation on a resource, in start order.
    pub async fn all_reservations(&self, resource_id: Ulid) -> Vec<ReservationInstance> {
        match self.get_resource(&resource_id) {
            Some(rs) => rs.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn resource(&self, id: Ulid) -> Result<Option<ResourceProfile>, StoreError> {
        match self.get_resource(&id) {
            Some(rs) => Ok(Some(rs.read().await.profile.clone())),
            None => Ok(None),
        }
    }

    async fn resources(&self) -> Result<Vec<ResourceProfile>, StoreError> {
        let shared: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let mut profiles = Vec::with_capacity(shared.len());
        for rs in shared {
            profiles.push(rs.read().await.profile.clone());
        }
        profiles.sort_by_key(|p| p.id);
        Ok(profiles)
    }

    async fn reservations_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Vec<ReservationInstance>, StoreError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations_overlapping(&span).cloned().collect())
    }

    async fn blocks_overlapping(
        &self,
        resource_id: Ulid,
        span: Span,
    ) -> Result<Vec<Block>, StoreError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.blocks_overlapping(&span).cloned().collect())
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<ReservationInstance>, StoreError> {
        let Ok(rs) = self.resource_of(&id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_reservation(&self, reservation: ReservationInstance) -> Result<(), StoreError> {
        if self.entity_to_resource.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(reservation.id));
        }
        let rs = self
            .get_resource(&reservation.resource_id)
            .ok_or(StoreError::NotFound(reservation.resource_id))?;
        let mut guard = rs.write().await;
        self.entity_to_resource
            .insert(reservation.id, reservation.resource_id);
        guard.insert_reservation(reservation);
        Ok(())
    }

    async fn update_reservation(&self, reservation: ReservationInstance) -> Result<(), StoreError> {
        let rs = self.resource_of(&reservation.id)?;
        let mut guard = rs.write().await;
        guard
            .remove_reservation(reservation.id)
            .ok_or(StoreError::NotFound(reservation.id))?;
        guard.insert_reservation(reservation);
        Ok(())
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        let rs = self.resource_of(&id)?;
        let mut guard = rs.write().await;
        guard.remove_reservation(id).ok_or(StoreError::NotFound(id))?;
        self.entity_to_resource.remove(&id);
        Ok(())
    }

    async fn insert_block(&self, block: Block) -> Result<(), StoreError> {
        if self.entity_to_resource.contains_key(&block.id) {
            return Err(StoreError::Duplicate(block.id));
        }
        let rs = self
            .get_resource(&block.resource_id)
            .ok_or(StoreError::NotFound(block.resource_id))?;
        let mut guard = rs.write().await;
        self.entity_to_resource.insert(block.id, block.resource_id);
        guard.insert_block(block);
        Ok(())
    }

    async fn delete_block(&self, id: Ulid) -> Result<Block, StoreError> {
        let rs = self.resource_of(&id)?;
        let mut guard = rs.write().await;
        let block = guard.remove_block(id).ok_or(StoreError::NotFound(id))?;
        self.entity_to_resource.remove(&id);
        Ok(block)
    }
}
