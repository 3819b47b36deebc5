use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// Inventory Collaborator
// ============================================================================
//
// Stock is keyed by (product, variant) and split across warehouses. Every
// decrement is a conditional "take if enough" under one lock, never a
// read-then-write, so concurrent checkouts cannot oversell.
//
// Reservations are recorded per order so a placement that fails half-way
// can hand back exactly what it took, and a retried placement does not
// reserve twice. An order holds its reservation until it is either
// cancelled (released: units go back to the warehouse they came from) or
// picked for shipping (committed: the record is dropped, the units stay
// gone). Either way the record is removed exactly once.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Insufficient stock for {product_id}/{variant_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: Uuid,
        variant_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Inventory backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    Reserved { warehouse_id: Uuid },
    /// No single warehouse can cover the request. `available` is the best one.
    Insufficient { available: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: u32,
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Take `quantity` units from the first warehouse that has enough.
    /// Reserving the same line again for the same order is a no-op.
    async fn reserve_stock_any_warehouse(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
        order_id: Uuid,
    ) -> Result<ReservationOutcome, InventoryError>;

    /// Give back everything reserved for `order_id`; returns the number of lines released
    async fn release_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError>;

    /// Drop the reservation record once its units have left for good;
    /// returns the number of lines committed
    async fn commit_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError>;

    async fn increment_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<(), InventoryError>;

    /// Conditional decrement; returns rows affected (0 when stock is short)
    async fn decrement_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<u64, InventoryError>;

    /// Total units across all warehouses
    async fn available(&self, product_id: Uuid, variant_id: Uuid) -> Result<u32, InventoryError>;
}

// ============================================================================
// In-Memory Inventory
// ============================================================================

type StockKey = (Uuid, Uuid);

#[derive(Default)]
struct InventoryState {
    stock: HashMap<StockKey, BTreeMap<Uuid, u32>>,
    reservations: HashMap<Uuid, Vec<Reservation>>,
}

impl InventoryState {
    fn take_from_any(&mut self, key: StockKey, quantity: u32) -> Result<Uuid, u32> {
        let warehouses = self.stock.entry(key).or_default();
        if let Some((warehouse_id, on_hand)) = warehouses.iter_mut().find(|(_, on_hand)| **on_hand >= quantity) {
            *on_hand -= quantity;
            return Ok(*warehouse_id);
        }
        Err(warehouses.values().copied().max().unwrap_or(0))
    }
}

pub struct InMemoryInventory {
    default_warehouse: Uuid,
    state: Mutex<InventoryState>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self {
            default_warehouse: Uuid::new_v4(),
            state: Mutex::new(InventoryState::default()),
        }
    }

    pub fn default_warehouse(&self) -> Uuid {
        self.default_warehouse
    }

    pub async fn set_stock(&self, product_id: Uuid, variant_id: Uuid, warehouse_id: Uuid, quantity: u32) {
        let mut state = self.state.lock().await;
        state
            .stock
            .entry((product_id, variant_id))
            .or_default()
            .insert(warehouse_id, quantity);
    }

    pub async fn reservations_for(&self, order_id: Uuid) -> Vec<Reservation> {
        let state = self.state.lock().await;
        state.reservations.get(&order_id).cloned().unwrap_or_default()
    }
}

impl Default for InMemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventory {
    async fn reserve_stock_any_warehouse(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
        order_id: Uuid,
    ) -> Result<ReservationOutcome, InventoryError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .reservations
            .get(&order_id)
            .and_then(|lines| lines.iter().find(|r| r.product_id == product_id && r.variant_id == variant_id))
        {
            return Ok(ReservationOutcome::Reserved {
                warehouse_id: existing.warehouse_id,
            });
        }

        match state.take_from_any((product_id, variant_id), quantity) {
            Ok(warehouse_id) => {
                state.reservations.entry(order_id).or_default().push(Reservation {
                    order_id,
                    product_id,
                    variant_id,
                    warehouse_id,
                    quantity,
                });
                tracing::debug!(
                    order_id = %order_id,
                    product_id = %product_id,
                    variant_id = %variant_id,
                    warehouse_id = %warehouse_id,
                    quantity = quantity,
                    "Stock reserved"
                );
                Ok(ReservationOutcome::Reserved { warehouse_id })
            }
            Err(available) => Ok(ReservationOutcome::Insufficient { available }),
        }
    }

    async fn release_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError> {
        let mut state = self.state.lock().await;
        let Some(lines) = state.reservations.remove(&order_id) else {
            return Ok(0);
        };

        for line in &lines {
            *state
                .stock
                .entry((line.product_id, line.variant_id))
                .or_default()
                .entry(line.warehouse_id)
                .or_default() += line.quantity;
        }

        tracing::info!(order_id = %order_id, lines = lines.len(), "Reservation released");
        Ok(lines.len())
    }

    async fn commit_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError> {
        let mut state = self.state.lock().await;
        let committed = state.reservations.remove(&order_id).map_or(0, |lines| lines.len());
        tracing::debug!(order_id = %order_id, lines = committed, "Reservation committed");
        Ok(committed)
    }

    async fn increment_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<(), InventoryError> {
        let mut state = self.state.lock().await;
        let warehouses = state.stock.entry((product_id, variant_id)).or_default();
        let warehouse_id = warehouses.keys().next().copied().unwrap_or(self.default_warehouse);
        *warehouses.entry(warehouse_id).or_default() += quantity;
        Ok(())
    }

    async fn decrement_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<u64, InventoryError> {
        let mut state = self.state.lock().await;
        match state.take_from_any((product_id, variant_id), quantity) {
            Ok(_) => Ok(1),
            Err(_) => Ok(0),
        }
    }

    async fn available(&self, product_id: Uuid, variant_id: Uuid) -> Result<u32, InventoryError> {
        let state = self.state.lock().await;
        Ok(state
            .stock
            .get(&(product_id, variant_id))
            .map(|w| w.values().sum())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_concurrent_decrements_never_oversell() {
        let inventory = Arc::new(InMemoryInventory::new());
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        inventory.set_stock(product, variant, inventory.default_warehouse(), 7).await;

        // 20 buyers race for 7 units
        let attempts = (0..20).map(|_| {
            let inventory = inventory.clone();
            tokio::spawn(async move { inventory.decrement_inventory(product, variant, 1).await })
        });
        let results: Vec<u64> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(results.iter().filter(|&&rows| rows == 1).count(), 7);
        assert_eq!(results.iter().filter(|&&rows| rows == 0).count(), 13);
        assert_eq!(inventory.available(product, variant).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_oversell() {
        let inventory = Arc::new(InMemoryInventory::new());
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        inventory.set_stock(product, variant, inventory.default_warehouse(), 5).await;

        let attempts = (0..8).map(|_| {
            let inventory = inventory.clone();
            tokio::spawn(async move {
                inventory
                    .reserve_stock_any_warehouse(product, variant, 2, Uuid::new_v4())
                    .await
            })
        });
        let outcomes: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let reserved = outcomes
            .iter()
            .filter(|o| matches!(o, ReservationOutcome::Reserved { .. }))
            .count();
        assert_eq!(reserved, 2);
        assert_eq!(inventory.available(product, variant).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reserve_picks_a_warehouse_with_enough_stock() {
        let inventory = InMemoryInventory::new();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        let (small, large) = (Uuid::new_v4(), Uuid::new_v4());
        inventory.set_stock(product, variant, small, 1).await;
        inventory.set_stock(product, variant, large, 10).await;

        let outcome = inventory
            .reserve_stock_any_warehouse(product, variant, 4, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, ReservationOutcome::Reserved { warehouse_id: large });

        let outcome = inventory
            .reserve_stock_any_warehouse(product, variant, 7, Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, ReservationOutcome::Insufficient { available: 6 });
    }

    #[tokio::test]
    async fn test_reservation_is_idempotent_and_releasable() {
        let inventory = InMemoryInventory::new();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        let order_id = Uuid::new_v4();
        inventory.set_stock(product, variant, inventory.default_warehouse(), 5).await;

        inventory.reserve_stock_any_warehouse(product, variant, 3, order_id).await.unwrap();
        inventory.reserve_stock_any_warehouse(product, variant, 3, order_id).await.unwrap();
        assert_eq!(inventory.available(product, variant).await.unwrap(), 2);
        assert_eq!(inventory.reservations_for(order_id).await.len(), 1);

        assert_eq!(inventory.release_reservation(order_id).await.unwrap(), 1);
        assert_eq!(inventory.available(product, variant).await.unwrap(), 5);
        assert_eq!(inventory.release_reservation(order_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_returns_units_to_their_warehouse_once() {
        let inventory = InMemoryInventory::new();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let [first, second] = ids;
        inventory.set_stock(product, variant, first, 1).await;
        inventory.set_stock(product, variant, second, 10).await;

        let order_id = Uuid::new_v4();
        let outcome = inventory.reserve_stock_any_warehouse(product, variant, 2, order_id).await.unwrap();
        assert_eq!(outcome, ReservationOutcome::Reserved { warehouse_id: second });

        assert_eq!(inventory.release_reservation(order_id).await.unwrap(), 1);
        assert_eq!(inventory.release_reservation(order_id).await.unwrap(), 0);
        let state = inventory.state.lock().await;
        let warehouses = &state.stock[&(product, variant)];
        assert_eq!(warehouses[&first], 1);
        assert_eq!(warehouses[&second], 10);
    }

    #[tokio::test]
    async fn test_committed_reservation_cannot_be_released() {
        let inventory = InMemoryInventory::new();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        let order_id = Uuid::new_v4();
        inventory.set_stock(product, variant, inventory.default_warehouse(), 5).await;

        inventory.reserve_stock_any_warehouse(product, variant, 3, order_id).await.unwrap();
        assert_eq!(inventory.commit_reservation(order_id).await.unwrap(), 1);
        assert!(inventory.reservations_for(order_id).await.is_empty());

        assert_eq!(inventory.release_reservation(order_id).await.unwrap(), 0);
        assert_eq!(inventory.commit_reservation(order_id).await.unwrap(), 0);
        assert_eq!(inventory.available(product, variant).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_increment_restores_stock() {
        let inventory = InMemoryInventory::new();
        let (product, variant) = (Uuid::new_v4(), Uuid::new_v4());
        inventory.increment_inventory(product, variant, 4).await.unwrap();
        assert_eq!(inventory.decrement_inventory(product, variant, 4).await.unwrap(), 1);
        assert_eq!(inventory.decrement_inventory(product, variant, 1).await.unwrap(), 0);
    }
}
