use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::value::{CqlValue, Row};
use std::sync::Arc;
use uuid::Uuid;

use super::inventory::{InventoryError, InventoryService, ReservationOutcome};

// ============================================================================
// ScyllaDB Inventory
// ============================================================================
//
// Tables:
// - inventory_stock        ((product_id, variant_id), warehouse_id)   on hand
// - inventory_reservation  ((order_id), product_id, variant_id)       taken
//
// Every stock change is a compare-and-set on the warehouse row
// (`IF quantity = ?`). A lost race re-reads and tries again, so two
// placements can never both take the last unit.
//
// Releasing deletes the reservation row with `IF EXISTS` before handing the
// units back; a retried release finds nothing to delete and restores nothing.
// Committing deletes the rows the same way and hands nothing back.
//
// ============================================================================

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS inventory_stock (
        product_id uuid,
        variant_id uuid,
        warehouse_id uuid,
        quantity int,
        PRIMARY KEY ((product_id, variant_id), warehouse_id)
    )",
    "CREATE TABLE IF NOT EXISTS inventory_reservation (
        order_id uuid,
        product_id uuid,
        variant_id uuid,
        warehouse_id uuid,
        quantity int,
        PRIMARY KEY ((order_id), product_id, variant_id)
    )",
];

/// Compare-and-set rounds before giving up on a hot row
const CAS_ATTEMPTS: u32 = 16;

pub struct ScyllaInventory {
    session: Arc<Session>,
    default_warehouse: Uuid,
}

impl ScyllaInventory {
    pub fn new(session: Arc<Session>, default_warehouse: Uuid) -> Self {
        Self {
            session,
            default_warehouse,
        }
    }

    pub async fn ensure_schema(session: &Session) -> anyhow::Result<()> {
        for statement in SCHEMA {
            session.query_unpaged(*statement, &[]).await?;
        }
        Ok(())
    }

    /// Overwrite the on-hand quantity of one warehouse
    pub async fn set_stock(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        self.session
            .query_unpaged(
                "INSERT INTO inventory_stock (product_id, variant_id, warehouse_id, quantity) VALUES (?, ?, ?, ?)",
                (product_id, variant_id, warehouse_id, to_cql(quantity)?),
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn warehouses(&self, product_id: Uuid, variant_id: Uuid) -> Result<Vec<(Uuid, u32)>, InventoryError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT warehouse_id, quantity FROM inventory_stock WHERE product_id = ? AND variant_id = ?",
                (product_id, variant_id),
            )
            .await
            .map_err(backend)?;

        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut warehouses = Vec::new();
        for row in rows.rows::<(Uuid, Option<i32>)>().map_err(backend)? {
            let (warehouse_id, quantity) = row.map_err(backend)?;
            warehouses.push((warehouse_id, quantity.unwrap_or(0).max(0) as u32));
        }
        warehouses.sort_by_key(|(warehouse_id, _)| *warehouse_id);
        Ok(warehouses)
    }

    async fn compare_and_set(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        warehouse_id: Uuid,
        expected: u32,
        new: u32,
    ) -> Result<bool, InventoryError> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE inventory_stock SET quantity = ?
                 WHERE product_id = ? AND variant_id = ? AND warehouse_id = ? IF quantity = ?",
                (to_cql(new)?, product_id, variant_id, warehouse_id, to_cql(expected)?),
            )
            .await
            .map_err(backend)?;
        applied(result)
    }

    /// Take `quantity` from the first warehouse holding enough.
    /// `Err(available)` carries the best single warehouse when none does.
    async fn take(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<Result<Uuid, u32>, InventoryError> {
        for _ in 0..CAS_ATTEMPTS {
            let warehouses = self.warehouses(product_id, variant_id).await?;
            let Some(&(warehouse_id, on_hand)) = warehouses.iter().find(|(_, on_hand)| *on_hand >= quantity) else {
                let best = warehouses.iter().map(|(_, on_hand)| *on_hand).max().unwrap_or(0);
                return Ok(Err(best));
            };
            if self
                .compare_and_set(product_id, variant_id, warehouse_id, on_hand, on_hand - quantity)
                .await?
            {
                return Ok(Ok(warehouse_id));
            }
            tracing::debug!(product_id = %product_id, warehouse_id = %warehouse_id, "Stock row changed, retrying");
        }
        Err(contention(product_id, variant_id))
    }

    /// (product, variant, warehouse, quantity) rows reserved for `order_id`
    async fn reserved_lines(&self, order_id: Uuid) -> Result<Vec<(Uuid, Uuid, Uuid, i32)>, InventoryError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT product_id, variant_id, warehouse_id, quantity FROM inventory_reservation WHERE order_id = ?",
                (order_id,),
            )
            .await
            .map_err(backend)?;
        let rows = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(Vec::new()),
        };

        let mut lines = Vec::new();
        for row in rows.rows::<(Uuid, Uuid, Uuid, i32)>().map_err(backend)? {
            lines.push(row.map_err(backend)?);
        }
        Ok(lines)
    }

    /// Delete one reservation row; `false` when a concurrent caller got it first
    async fn claim(&self, order_id: Uuid, product_id: Uuid, variant_id: Uuid) -> Result<bool, InventoryError> {
        let result = self
            .session
            .query_unpaged(
                "DELETE FROM inventory_reservation
                 WHERE order_id = ? AND product_id = ? AND variant_id = ? IF EXISTS",
                (order_id, product_id, variant_id),
            )
            .await
            .map_err(backend)?;
        applied(result)
    }

    async fn give_back(&self, product_id: Uuid, variant_id: Uuid, warehouse_id: Uuid, quantity: u32) -> Result<(), InventoryError> {
        for _ in 0..CAS_ATTEMPTS {
            let on_hand = self
                .warehouses(product_id, variant_id)
                .await?
                .into_iter()
                .find(|(id, _)| *id == warehouse_id)
                .map(|(_, on_hand)| on_hand);

            let done = match on_hand {
                Some(on_hand) => {
                    self.compare_and_set(product_id, variant_id, warehouse_id, on_hand, on_hand + quantity)
                        .await?
                }
                None => {
                    let result = self
                        .session
                        .query_unpaged(
                            "INSERT INTO inventory_stock (product_id, variant_id, warehouse_id, quantity)
                             VALUES (?, ?, ?, ?) IF NOT EXISTS",
                            (product_id, variant_id, warehouse_id, to_cql(quantity)?),
                        )
                        .await
                        .map_err(backend)?;
                    applied(result)?
                }
            };
            if done {
                return Ok(());
            }
        }
        Err(contention(product_id, variant_id))
    }
}

#[async_trait]
impl InventoryService for ScyllaInventory {
    async fn reserve_stock_any_warehouse(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        quantity: u32,
        order_id: Uuid,
    ) -> Result<ReservationOutcome, InventoryError> {
        let existing = self
            .session
            .query_unpaged(
                "SELECT warehouse_id FROM inventory_reservation
                 WHERE order_id = ? AND product_id = ? AND variant_id = ?",
                (order_id, product_id, variant_id),
            )
            .await
            .map_err(backend)?;
        if let Ok(rows) = existing.into_rows_result() {
            if let Some((warehouse_id,)) = rows.maybe_first_row::<(Uuid,)>().map_err(backend)? {
                return Ok(ReservationOutcome::Reserved { warehouse_id });
            }
        }

        let warehouse_id = match self.take(product_id, variant_id, quantity).await? {
            Ok(warehouse_id) => warehouse_id,
            Err(available) => return Ok(ReservationOutcome::Insufficient { available }),
        };

        let recorded = self
            .session
            .query_unpaged(
                "INSERT INTO inventory_reservation (order_id, product_id, variant_id, warehouse_id, quantity)
                 VALUES (?, ?, ?, ?, ?) IF NOT EXISTS",
                (order_id, product_id, variant_id, warehouse_id, to_cql(quantity)?),
            )
            .await
            .map_err(backend)?;

        if !applied(recorded)? {
            // A concurrent retry of the same placement recorded the line first
            self.give_back(product_id, variant_id, warehouse_id, quantity).await?;
        }

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

    async fn release_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError> {
        let mut released = 0;
        for (product_id, variant_id, warehouse_id, quantity) in self.reserved_lines(order_id).await? {
            if !self.claim(order_id, product_id, variant_id).await? {
                continue;
            }
            self.give_back(product_id, variant_id, warehouse_id, quantity.max(0) as u32)
                .await?;
            released += 1;
        }

        tracing::info!(order_id = %order_id, lines = released, "Reservation released");
        Ok(released)
    }

    async fn commit_reservation(&self, order_id: Uuid) -> Result<usize, InventoryError> {
        let mut committed = 0;
        for (product_id, variant_id, _, _) in self.reserved_lines(order_id).await? {
            if self.claim(order_id, product_id, variant_id).await? {
                committed += 1;
            }
        }
        tracing::debug!(order_id = %order_id, lines = committed, "Reservation committed");
        Ok(committed)
    }

    async fn increment_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<(), InventoryError> {
        let warehouse_id = self
            .warehouses(product_id, variant_id)
            .await?
            .first()
            .map(|(warehouse_id, _)| *warehouse_id)
            .unwrap_or(self.default_warehouse);
        self.give_back(product_id, variant_id, warehouse_id, quantity).await
    }

    async fn decrement_inventory(&self, product_id: Uuid, variant_id: Uuid, quantity: u32) -> Result<u64, InventoryError> {
        match self.take(product_id, variant_id, quantity).await? {
            Ok(_) => Ok(1),
            Err(_) => Ok(0),
        }
    }

    async fn available(&self, product_id: Uuid, variant_id: Uuid) -> Result<u32, InventoryError> {
        Ok(self
            .warehouses(product_id, variant_id)
            .await?
            .iter()
            .map(|(_, on_hand)| *on_hand)
            .sum())
    }
}

fn backend<E: Into<anyhow::Error>>(error: E) -> InventoryError {
    InventoryError::Backend(error.into())
}

fn contention(product_id: Uuid, variant_id: Uuid) -> InventoryError {
    InventoryError::Backend(anyhow::anyhow!(
        "stock row {product_id}/{variant_id} kept changing after {CAS_ATTEMPTS} attempts"
    ))
}

fn to_cql(quantity: u32) -> Result<i32, InventoryError> {
    i32::try_from(quantity).map_err(backend)
}

/// Read `[applied]` from an LWT result
fn applied(result: QueryResult) -> Result<bool, InventoryError> {
    let rows = result.into_rows_result().map_err(backend)?;
    let row = rows
        .maybe_first_row::<Row>()
        .map_err(backend)?
        .ok_or_else(|| InventoryError::Backend(anyhow::anyhow!("LWT returned no rows")))?;
    Ok(matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true)))))
}
