use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Address, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus};
use std::collections::HashMap;
use tokio_postgres::{Client, Row, Transaction};
use tracing::info;

use super::loyalty::apply_tx;
use super::parse_column;
use super::users::address_from_row;
use crate::{OrdersRepository, PaymentConfirmation, RepositoryError};

const ORDER_COLUMNS: &str = r#"
    id, user_id, address_id, delivery_type, delivery_date, delivery_time,
    recipient_name, recipient_phone, comment, is_anonymous, card_text,
    total_price, bonus_used, bonus_earned, status, payment_status, payment_id, created_at
"#;

const ITEM_COLUMNS: &str =
    "id, order_id, bouquet_id, name, price, quantity, is_constructor, constructor_data";

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    Ok(Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        address_id: row.get("address_id"),
        delivery_type: parse_column(row, "delivery_type")?,
        delivery_date: row.get("delivery_date"),
        delivery_time: row.get("delivery_time"),
        recipient_name: row.get("recipient_name"),
        recipient_phone: row.get("recipient_phone"),
        comment: row.get("comment"),
        is_anonymous: row.get("is_anonymous"),
        card_text: row.get("card_text"),
        total_price: row.get("total_price"),
        bonus_used: row.get("bonus_used"),
        bonus_earned: row.get("bonus_earned"),
        status: parse_column(row, "status")?,
        payment_status: parse_column(row, "payment_status")?,
        payment_id: row.get("payment_id"),
        created_at: row.get("created_at"),
        items: Vec::new(),   // To be filled by hydrate
        address: None,       // To be filled by hydrate
    })
}

fn item_from_row(row: &Row) -> OrderItem {
    OrderItem {
        id: row.get("id"),
        order_id: row.get("order_id"),
        bouquet_id: row.get("bouquet_id"),
        name: row.get("name"),
        price: row.get("price"),
        quantity: row.get("quantity"),
        is_constructor: row.get("is_constructor"),
        constructor_data: row.get("constructor_data"),
    }
}

async fn load_addresses(
    client: &Client,
    orders: &[Order],
) -> Result<HashMap<i32, Address>, RepositoryError> {
    let address_ids: Vec<i32> = orders.iter().filter_map(|o| o.address_id).collect();
    let mut addresses = HashMap::new();
    if address_ids.is_empty() {
        return Ok(addresses);
    }
    let rows = client
        .query(
            r#"
            SELECT id, user_id, title, street, house, apartment, entrance, floor, comment, is_default
            FROM addresses WHERE id = ANY($1)
            "#,
            &[&address_ids],
        )
        .await?;
    for row in rows {
        let address = address_from_row(&row);
        addresses.insert(address.id, address);
    }
    Ok(addresses)
}

/// Orders without an entry in `items` keep the items they already carry.
fn attach_relations(
    orders: &mut [Order],
    mut items: HashMap<i32, Vec<OrderItem>>,
    addresses: &HashMap<i32, Address>,
) {
    for order in orders {
        if let Some(order_items) = items.remove(&order.id) {
            order.items = order_items;
        }
        order.address = order.address_id.and_then(|id| addresses.get(&id).cloned());
    }
}

/// Attaches items and delivery addresses to a batch of order rows.
async fn hydrate(client: &Client, mut orders: Vec<Order>) -> Result<Vec<Order>, RepositoryError> {
    if orders.is_empty() {
        return Ok(orders);
    }

    let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
    let query = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY id");
    let mut items: HashMap<i32, Vec<OrderItem>> = HashMap::new();
    for row in client.query(&query, &[&order_ids]).await? {
        let item = item_from_row(&row);
        items.entry(item.order_id).or_default().push(item);
    }

    let addresses = load_addresses(client, &orders).await?;
    attach_relations(&mut orders, items, &addresses);
    Ok(orders)
}

async fn insert_order_tx(tx: &Transaction<'_>, order: &NewOrder) -> Result<Order, RepositoryError> {
    let query = format!(
        r#"
        INSERT INTO orders (
            user_id, address_id, delivery_type, delivery_date, delivery_time,
            recipient_name, recipient_phone, comment, is_anonymous, card_text,
            total_price, bonus_used, bonus_earned, status, payment_status
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        RETURNING {ORDER_COLUMNS}
        "#
    );
    let row = tx
        .query_one(
            &query,
            &[
                &order.user_id,
                &order.address_id,
                &order.delivery_type.as_str(),
                &order.delivery_date,
                &order.delivery_time,
                &order.recipient_name,
                &order.recipient_phone,
                &order.comment,
                &order.is_anonymous,
                &order.card_text,
                &order.total_price,
                &order.bonus_used,
                &order.bonus_earned,
                &OrderStatus::New.as_str(),
                &PaymentStatus::Pending.as_str(),
            ],
        )
        .await?;
    order_from_row(&row)
}

async fn insert_items_tx(
    tx: &Transaction<'_>,
    order_id: i32,
    order: &NewOrder,
) -> Result<Vec<OrderItem>, RepositoryError> {
    let query = format!(
        r#"
        INSERT INTO order_items (order_id, bouquet_id, name, price, quantity, is_constructor, constructor_data)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {ITEM_COLUMNS}
        "#
    );
    let mut items = Vec::with_capacity(order.items.len());
    for it in &order.items {
        let row = tx
            .query_one(
                &query,
                &[
                    &order_id,
                    &it.bouquet_id,
                    &it.name,
                    &it.price,
                    &it.quantity,
                    &it.is_constructor,
                    &it.constructor_data,
                ],
            )
            .await?;
        items.push(item_from_row(&row));
    }
    Ok(items)
}

/// PostgreSQL implementation of the OrdersRepository trait.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn create(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let mut created = insert_order_tx(&tx, order).await?;
        created.items = insert_items_tx(&tx, created.id, order).await?;

        if order.bonus_used > 0 {
            let description = format!("Списание за заказ #{}", created.id);
            apply_tx(&tx, order.user_id, -order.bonus_used, &description, Some(created.id)).await?;
        }

        tx.commit().await?;
        info!(order_id = created.id, user_id = created.user_id, "Order persisted");

        let addresses = load_addresses(&client, std::slice::from_ref(&created)).await?;
        attach_relations(std::slice::from_mut(&mut created), HashMap::new(), &addresses);
        Ok(created)
    }

    async fn get_by_id(&self, order_id: i32) -> Result<Order, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = client
            .query_opt(&query, &[&order_id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let order = order_from_row(&row)?;
        hydrate(&client, vec![order])
            .await?
            .pop()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_by_user(&self, user_id: i32) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        );
        let rows = client.query(&query, &[&user_id]).await?;
        let orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        hydrate(&client, orders).await
    }

    async fn list_all(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at DESC, id DESC"
                );
                client.query(&query, &[&status.as_str()]).await?
            }
            None => {
                let query =
                    format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC");
                client.query(&query, &[]).await?
            }
        };
        let orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        hydrate(&client, orders).await
    }

    async fn update_status(
        &self,
        order_id: i32,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        {
            let client = self.pool.get().await?;
            let updated = client
                .execute(
                    "UPDATE orders SET status = $3, updated_at = now() WHERE id = $1 AND status = $2",
                    &[&order_id, &from.as_str(), &to.as_str()],
                )
                .await?;
            if updated == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "order #{order_id} is no longer '{from}'"
                )));
            }
        }
        self.get_by_id(order_id).await
    }

    async fn set_payment_id(&self, order_id: i32, payment_id: &str) -> Result<(), RepositoryError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE orders SET payment_id = $2, updated_at = now() WHERE id = $1",
                &[&order_id, &payment_id],
            )
            .await?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn confirm_payment(
        &self,
        order_id: i32,
    ) -> Result<Option<PaymentConfirmation>, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // The row lock taken here serialises concurrent deliveries of the same event.
        let row = tx
            .query_opt(
                r#"
                UPDATE orders
                SET payment_status = 'paid',
                    status = CASE WHEN status = 'new' THEN 'confirmed' ELSE status END,
                    updated_at = now()
                WHERE id = $1 AND payment_status <> 'paid'
                RETURNING id, user_id, bonus_earned
                "#,
                &[&order_id],
            )
            .await?;

        let Some(row) = row else {
            let exists = tx
                .query_opt("SELECT 1 FROM orders WHERE id = $1", &[&order_id])
                .await?
                .is_some();
            return if exists { Ok(None) } else { Err(RepositoryError::NotFound) };
        };

        let confirmation = PaymentConfirmation {
            order_id: row.get("id"),
            user_id: row.get("user_id"),
            bonus_credited: row.get("bonus_earned"),
        };

        if confirmation.bonus_credited > 0 {
            let description = format!("Кэшбэк за заказ #{}", confirmation.order_id);
            apply_tx(
                &tx,
                confirmation.user_id,
                confirmation.bonus_credited,
                &description,
                Some(confirmation.order_id),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(Some(confirmation))
    }

    async fn cancel_payment(&self, order_id: i32) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE orders SET payment_status = 'canceled', updated_at = now() WHERE id = $1 AND payment_status = 'pending'",
                &[&order_id],
            )
            .await?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::DeliveryType;

    fn order(id: i32, address_id: Option<i32>) -> Order {
        Order {
            id,
            user_id: 1,
            address_id,
            delivery_type: DeliveryType::Delivery,
            delivery_date: None,
            delivery_time: None,
            recipient_name: None,
            recipient_phone: None,
            comment: None,
            is_anonymous: false,
            card_text: None,
            total_price: 1000,
            bonus_used: 0,
            bonus_earned: 50,
            status: OrderStatus::New,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            created_at: Utc::now(),
            items: Vec::new(),
            address: None,
        }
    }

    fn item(id: i32, order_id: i32) -> OrderItem {
        OrderItem {
            id,
            order_id,
            bouquet_id: Some(5),
            name: "Нежность".into(),
            price: 1000,
            quantity: 1,
            is_constructor: false,
            constructor_data: None,
        }
    }

    fn address(id: i32) -> Address {
        Address {
            id,
            user_id: 1,
            title: "Дом".into(),
            street: "ул. Приозёрная".into(),
            house: "58".into(),
            apartment: None,
            entrance: None,
            floor: None,
            comment: None,
            is_default: true,
        }
    }

    #[test]
    fn test_freshly_created_order_gets_its_address() {
        let mut created = order(7, Some(3));
        created.items = vec![item(1, 7)];
        let addresses = HashMap::from([(3, address(3))]);

        attach_relations(std::slice::from_mut(&mut created), HashMap::new(), &addresses);

        assert_eq!(created.address.as_ref().map(|a| a.id), Some(3));
        assert_eq!(created.items.len(), 1);
    }

    #[test]
    fn test_attach_relations_matches_by_id() {
        let mut orders = vec![order(1, Some(10)), order(2, None), order(3, Some(99))];
        let items = HashMap::from([(1, vec![item(1, 1), item(2, 1)]), (2, vec![item(3, 2)])]);
        let addresses = HashMap::from([(10, address(10))]);

        attach_relations(&mut orders, items, &addresses);

        assert_eq!(orders[0].items.len(), 2);
        assert_eq!(orders[0].address.as_ref().map(|a| a.street.as_str()), Some("ул. Приозёрная"));
        assert_eq!(orders[1].items.len(), 1);
        assert!(orders[1].address.is_none());
        assert!(orders[2].items.is_empty());
        assert!(orders[2].address.is_none());
    }
}
