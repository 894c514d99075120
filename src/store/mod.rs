//! Order and menu persistence.
//!
//! The relay only needs an append-only order log and a mutable price table,
//! so the store is a narrow trait. [`MemoryStore`] implements it in process;
//! a relational backend only has to provide the same four operations.

mod memory;

use async_trait::async_trait;

pub use memory::MemoryStore;

use crate::types::{MenuItem, NewOrder, Order, OrderId};
use crate::Result;

/// Persistence for orders and menu prices.
///
/// Implementations report failures as [`Error::Persistence`](crate::Error::Persistence).
#[async_trait]
pub trait Store: Send + Sync {
    /// Append an order row and return its id
    async fn append_order(&self, order: NewOrder) -> Result<OrderId>;

    /// All orders, most recent first
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// All menu items ordered by id
    async fn list_menu_items(&self) -> Result<Vec<MenuItem>>;

    /// Set the price of the item called `name`.
    ///
    /// Returns `false` when no item has that name; nothing is changed then.
    async fn update_price(&self, name: &str, price: f64) -> Result<bool>;
}
