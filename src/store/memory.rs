//! In-process [`Store`] backed by `parking_lot` locks.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::Store;
use crate::error::Error;
use crate::types::menu::DEFAULT_MENU;
use crate::types::{MenuItem, NewOrder, Order, OrderId};
use crate::Result;

/// Stored order row; items and metadata stay serialized until read
#[derive(Debug, Clone)]
struct OrderRow {
    id: OrderId,
    items: String,
    total_price: f64,
    store_metadata: String,
    latency_publish: String,
    latency_round_trip: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn decode(&self) -> Result<Order> {
        Ok(Order {
            id: self.id,
            items: serde_json::from_str(&self.items).map_err(|e| {
                Error::Persistence(format!("order {} has unreadable items: {}", self.id, e))
            })?,
            total_price: self.total_price,
            store_metadata: serde_json::from_str(&self.store_metadata).map_err(|e| {
                Error::Persistence(format!("order {} has unreadable metadata: {}", self.id, e))
            })?,
            latency_publish: self.latency_publish.clone(),
            latency_round_trip: self.latency_round_trip.clone(),
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Default)]
struct Menu {
    /// Items in id order
    items: Vec<MenuItem>,
    /// Name -> position in `items`
    by_name: FxHashMap<String, usize>,
}

/// Thread-safe in-memory store.
///
/// Order ids start at 1 and increase with every append. The availability
/// switch lets callers simulate an unreachable database.
///
/// # Example
///
/// ```rust
/// use pos_relay::store::{MemoryStore, Store};
///
/// # async fn example() -> pos_relay::Result<()> {
/// let store = MemoryStore::with_default_menu();
/// assert!(store.update_price("Big Mac", 6.49).await?);
/// assert!(!store.update_price("Whopper", 6.49).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    orders: RwLock<Vec<OrderRow>>,
    menu: RwLock<Menu>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store with no orders and an empty menu
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            menu: RwLock::new(Menu::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Create a store seeded with the standard menu
    pub fn with_default_menu() -> Self {
        Self::with_menu(DEFAULT_MENU.iter().map(|(name, price)| (*name, *price)))
    }

    /// Create a store seeded with the given `(name, price)` pairs.
    ///
    /// Later duplicates of a name are ignored.
    pub fn with_menu<N: Into<String>>(items: impl IntoIterator<Item = (N, f64)>) -> Self {
        let store = Self::new();
        for (name, price) in items {
            store.insert_menu_item(name, price);
        }
        store
    }

    /// Add a menu item, returning its id, or `None` if the name exists
    pub fn insert_menu_item(&self, name: impl Into<String>, price: f64) -> Option<i64> {
        let name = name.into();
        let mut menu = self.menu.write();
        if menu.by_name.contains_key(&name) {
            return None;
        }
        let id = menu.items.len() as i64 + 1;
        let idx = menu.items.len();
        menu.items.push(MenuItem {
            id,
            name: name.clone(),
            price,
        });
        menu.by_name.insert(name, idx);
        Some(id)
    }

    /// Make every operation fail (`false`) or succeed again (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored orders
    pub fn order_count(&self) -> usize {
        self.orders.read().len()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Persistence("store unavailable".into()))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_order(&self, order: NewOrder) -> Result<OrderId> {
        self.check_available()?;
        if !order.total_price.is_finite() {
            return Err(Error::Persistence(format!(
                "total price must be finite, got {}",
                order.total_price
            )));
        }

        let mut orders = self.orders.write();
        let id = orders.last().map_or(1, |row| row.id + 1);
        orders.push(OrderRow {
            id,
            items: order.items,
            total_price: order.total_price,
            store_metadata: order.store_metadata,
            latency_publish: order.latency_publish,
            latency_round_trip: order.latency_round_trip,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        self.check_available()?;
        self.orders.read().iter().rev().map(OrderRow::decode).collect()
    }

    async fn list_menu_items(&self) -> Result<Vec<MenuItem>> {
        self.check_available()?;
        Ok(self.menu.read().items.clone())
    }

    async fn update_price(&self, name: &str, price: f64) -> Result<bool> {
        self.check_available()?;
        if !price.is_finite() {
            return Err(Error::Persistence(format!("price must be finite, got {}", price)));
        }

        let mut menu = self.menu.write();
        let Some(idx) = menu.by_name.get(name).copied() else {
            return Ok(false);
        };
        menu.items[idx].price = price;
        Ok(true)
    }
}
