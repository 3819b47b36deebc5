use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::pricing::{self, Coupon, ProductDiscount};
use super::error::ServiceError;

// ============================================================================
// Catalog Collaborator (read-only)
// ============================================================================

/// Current catalog data for one variant
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSnapshot {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub shop_id: Uuid,
    pub name: String,
    pub sku: String,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub unit_price: Decimal,
    pub cost_price: Decimal,
    pub discount: Option<ProductDiscount>,
}

impl ProductSnapshot {
    /// Product discount on one unit at today's price
    pub fn unit_discount(&self) -> Decimal {
        pricing::item_discount(self.unit_price, self.discount.as_ref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Product {product_id} variant {variant_id} not found")]
    ProductNotFound { product_id: Uuid, variant_id: Uuid },

    #[error("Catalog backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::ProductNotFound { product_id, variant_id } => {
                ServiceError::not_found("Product", format!("{product_id}/{variant_id}"))
            }
            CatalogError::Backend(e) => ServiceError::Internal(e),
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, product_id: Uuid, variant_id: Uuid) -> Result<ProductSnapshot, CatalogError>;

    /// Coupon codes are matched case-insensitively
    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, CatalogError>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<(Uuid, Uuid), ProductSnapshot>>,
    coupons: RwLock<HashMap<String, Coupon>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_product(&self, product: ProductSnapshot) {
        self.products
            .write()
            .await
            .insert((product.product_id, product.variant_id), product);
    }

    pub async fn upsert_coupon(&self, coupon: Coupon) {
        self.coupons
            .write()
            .await
            .insert(coupon.code.to_uppercase(), coupon);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, product_id: Uuid, variant_id: Uuid) -> Result<ProductSnapshot, CatalogError> {
        self.products
            .read()
            .await
            .get(&(product_id, variant_id))
            .cloned()
            .ok_or(CatalogError::ProductNotFound { product_id, variant_id })
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, CatalogError> {
        Ok(self.coupons.read().await.get(&code.trim().to_uppercase()).cloned())
    }
}
