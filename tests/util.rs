#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use garagedesk_lib::{migrate, Customer, CustomerInput, Vehicle};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub fn vehicle(id: &str, reg: &str, inspection: Option<&str>, service: Option<&str>) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        registration_number: reg.to_string(),
        make: "Toyota".to_string(),
        model: "Corolla".to_string(),
        year: "2019".to_string(),
        inspection_due_date: inspection.map(str::to_string),
        service_due_date: service.map(str::to_string),
    }
}

pub fn customer(id: &str, name: &str, vehicles: Vec<Vehicle>) -> Customer {
    Customer {
        id: id.to_string(),
        company_name: name.to_string(),
        email: format!("{id}@example.com"),
        phone: "01 234 5678".to_string(),
        vehicles,
        ..Customer::default()
    }
}

pub fn input(first: &str, last: &str, vehicles: Vec<Vehicle>) -> CustomerInput {
    CustomerInput {
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}@example.com", first.to_lowercase()),
        mobile: "087 123 4567".to_string(),
        vehicles,
        ..CustomerInput::default()
    }
}
