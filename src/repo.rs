use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::id::new_uuid_v7;
use crate::model::{Customer, CustomerInput, Vehicle};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const CUSTOMER_NOT_FOUND: &str = "CUSTOMER/NOT_FOUND";

/// Read access to the customer list. Reminder computation only ever needs
/// the full list.
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn list(&self) -> AppResult<Vec<Customer>>;
}

#[derive(Debug, Error)]
pub enum CustomerCrudError {
    #[error("customer {0} not found")]
    NotFound(String),
    #[error("invalid customer: {0}")]
    Validation(#[source] AppError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CustomerCrudError> for AppError {
    fn from(err: CustomerCrudError) -> Self {
        match err {
            CustomerCrudError::NotFound(id) => {
                AppError::new(CUSTOMER_NOT_FOUND, "Customer not found.").with_context("id", id)
            }
            CustomerCrudError::Validation(inner) => inner,
            CustomerCrudError::Database(inner) => AppError::from(inner),
        }
    }
}

pub type CrudResult<T> = Result<T, CustomerCrudError>;

const CUSTOMER_COLUMNS: &str = "id, first_name, last_name, company_name, email, phone, mobile, \
     address, created_at, updated_at";

const VEHICLE_COLUMNS: &str = "id, customer_id, registration_number, make, model, year, \
     inspection_due_date, service_due_date";

fn customer_from_row(row: &SqliteRow) -> Result<Customer, sqlx::Error> {
    Ok(Customer {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        company_name: row.try_get("company_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        mobile: row.try_get("mobile")?,
        address: row.try_get("address")?,
        vehicles: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vehicle_from_row(row: &SqliteRow) -> Result<(String, Vehicle), sqlx::Error> {
    let owner: String = row.try_get("customer_id")?;
    let vehicle = Vehicle {
        id: row.try_get("id")?,
        registration_number: row.try_get("registration_number")?,
        make: row.try_get("make")?,
        model: row.try_get("model")?,
        year: row.try_get("year")?,
        inspection_due_date: row.try_get("inspection_due_date")?,
        service_due_date: row.try_get("service_due_date")?,
    };
    Ok((owner, vehicle))
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Insert `vehicles` in order. A supplied id survives only if it is in
/// `reusable` (ids this customer already owned), and at most once; every
/// other vehicle gets a fresh id.
async fn insert_vehicles(
    tx: &mut Transaction<'_, Sqlite>,
    customer_id: &str,
    vehicles: &[Vehicle],
    mut reusable: HashSet<String>,
) -> Result<Vec<Vehicle>, sqlx::Error> {
    let mut stored = Vec::with_capacity(vehicles.len());
    for (position, vehicle) in vehicles.iter().enumerate() {
        let mut vehicle = vehicle.clone();
        let supplied = vehicle.id.trim().to_string();
        vehicle.id = if reusable.remove(&supplied) {
            supplied
        } else {
            new_uuid_v7()
        };
        vehicle.registration_number = vehicle.registration_number.trim().to_string();
        vehicle.inspection_due_date = blank_to_none(vehicle.inspection_due_date.take());
        vehicle.service_due_date = blank_to_none(vehicle.service_due_date.take());

        sqlx::query(
            "INSERT INTO vehicles (id, customer_id, registration_number, make, model, year, \
             inspection_due_date, service_due_date, position) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&vehicle.id)
        .bind(customer_id)
        .bind(&vehicle.registration_number)
        .bind(&vehicle.make)
        .bind(&vehicle.model)
        .bind(&vehicle.year)
        .bind(&vehicle.inspection_due_date)
        .bind(&vehicle.service_due_date)
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
        stored.push(vehicle);
    }
    Ok(stored)
}

/// Customers and their vehicles stored in SQLite. Vehicles keep the order
/// they were supplied in.
#[derive(Clone)]
pub struct SqliteCustomerRepository {
    pool: SqlitePool,
}

impl SqliteCustomerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_customers(&self) -> CrudResult<Vec<Customer>> {
        let rows = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE, \
             company_name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut customers = rows
            .iter()
            .map(customer_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let vehicle_rows = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles ORDER BY customer_id, position, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut by_owner: HashMap<String, Vec<Vehicle>> = HashMap::new();
        for row in &vehicle_rows {
            let (owner, vehicle) = vehicle_from_row(row)?;
            by_owner.entry(owner).or_default().push(vehicle);
        }
        for customer in &mut customers {
            customer.vehicles = by_owner.remove(&customer.id).unwrap_or_default();
        }
        Ok(customers)
    }

    pub async fn get(&self, id: &str) -> CrudResult<Customer> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CustomerCrudError::NotFound(id.to_string()))?;
        let mut customer = customer_from_row(&row)?;

        let vehicle_rows = sqlx::query(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE customer_id = ? ORDER BY position, id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        customer.vehicles = vehicle_rows
            .iter()
            .map(|row| vehicle_from_row(row).map(|(_, v)| v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(customer)
    }

    pub async fn create(&self, input: CustomerInput) -> CrudResult<Customer> {
        input.validate().map_err(CustomerCrudError::Validation)?;
        let id = new_uuid_v7();
        let now = now_ms();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO customers (id, first_name, last_name, company_name, email, phone, \
             mobile, address, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(input.first_name.trim())
        .bind(input.last_name.trim())
        .bind(input.company_name.trim())
        .bind(input.email.trim())
        .bind(input.phone.trim())
        .bind(input.mobile.trim())
        .bind(input.address.trim())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let vehicles = insert_vehicles(&mut tx, &id, &input.vehicles, HashSet::new()).await?;
        tx.commit().await?;

        tracing::info!(
            target: "garagedesk",
            event = "customer_created",
            id = %id,
            vehicles = vehicles.len()
        );

        Ok(Customer {
            id,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            company_name: input.company_name.trim().to_string(),
            email: input.email.trim().to_string(),
            phone: input.phone.trim().to_string(),
            mobile: input.mobile.trim().to_string(),
            address: input.address.trim().to_string(),
            vehicles,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overwrite the customer's fields and replace its vehicles wholesale.
    /// Vehicle ids already owned by this customer are kept.
    pub async fn update(&self, id: &str, input: CustomerInput) -> CrudResult<Customer> {
        input.validate().map_err(CustomerCrudError::Validation)?;
        let mut tx = self.pool.begin().await?;

        // Strictly later than the stored value even within the same millisecond.
        let updated_at: i64 = sqlx::query_scalar(
            "UPDATE customers SET first_name = ?, last_name = ?, company_name = ?, email = ?, \
             phone = ?, mobile = ?, address = ?, updated_at = MAX(?, updated_at + 1) \
             WHERE id = ? RETURNING updated_at",
        )
        .bind(input.first_name.trim())
        .bind(input.last_name.trim())
        .bind(input.company_name.trim())
        .bind(input.email.trim())
        .bind(input.phone.trim())
        .bind(input.mobile.trim())
        .bind(input.address.trim())
        .bind(now_ms())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CustomerCrudError::NotFound(id.to_string()))?;

        let owned: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT id FROM vehicles WHERE customer_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();
        sqlx::query("DELETE FROM vehicles WHERE customer_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_vehicles(&mut tx, id, &input.vehicles, owned).await?;
        tx.commit().await?;

        tracing::info!(
            target: "garagedesk",
            event = "customer_updated",
            id = %id,
            updated_at
        );
        self.get(id).await
    }

    /// Remove the customer; its vehicles go with it.
    pub async fn delete(&self, id: &str) -> CrudResult<()> {
        let res = sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(CustomerCrudError::NotFound(id.to_string()));
        }
        tracing::info!(target: "garagedesk", event = "customer_deleted", id = %id);
        Ok(())
    }
}

#[async_trait]
impl CustomerRepository for SqliteCustomerRepository {
    async fn list(&self) -> AppResult<Vec<Customer>> {
        self.list_customers().await.map_err(AppError::from)
    }
}

/// Fixed customer list held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCustomerRepository {
    customers: Vec<Customer>,
}

impl StaticCustomerRepository {
    pub fn new(customers: Vec<Customer>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl CustomerRepository for StaticCustomerRepository {
    async fn list(&self) -> AppResult<Vec<Customer>> {
        Ok(self.customers.clone())
    }
}
