//! # Seed Data Generator
//!
//! Populates the stock ledger with a small catalog for local development.
//!
//! ## Usage
//! ```bash
//! # Seed the default tenant with 10 units of every product
//! cargo run -p checkout-db --bin seed
//!
//! # Custom tenant, stock level and database path
//! cargo run -p checkout-db --bin seed -- --tenant store-42 --stock 3 --db ./data/checkout.db
//! ```
//!
//! Low stock levels are useful for exercising the oversell path by hand:
//! with `--stock 1`, the second concurrent checkout of a product gets a 409.

use chrono::Utc;
use std::env;
use uuid::Uuid;

use checkout_core::validation::{validate_price_cents, validate_product_name, validate_sku};
use checkout_core::ProductStock;
use checkout_db::{Database, DbConfig};

/// `(sku, name, price in minor units)`
const CATALOG: &[(&str, &str, i64)] = &[
    ("KOPI-SUSU-250", "Kopi Susu 250ml", 18_000),
    ("KOPI-HITAM-250", "Kopi Hitam 250ml", 15_000),
    ("TEH-TARIK-300", "Teh Tarik 300ml", 16_000),
    ("MATCHA-LATTE-300", "Matcha Latte 300ml", 25_000),
    ("CROISSANT-BUTTER", "Butter Croissant", 22_000),
    ("ROTI-BAKAR-COKLAT", "Roti Bakar Coklat", 20_000),
    ("NASI-GORENG", "Nasi Goreng Spesial", 35_000),
    ("MIE-AYAM", "Mie Ayam", 28_000),
    ("AIR-MINERAL-600", "Air Mineral 600ml", 5_000),
    ("BROWNIES-SLICE", "Brownies Slice", 12_000),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut stock: i64 = 10;
    let mut tenant = String::from("tenant-dev");
    let mut db_path = String::from("./checkout_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--stock" | "-s" => {
                if i + 1 < args.len() {
                    stock = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "--tenant" | "-t" => {
                if i + 1 < args.len() {
                    tenant = args[i + 1].clone();
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Checkout Engine Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --stock <N>      Units per product (default: 10)");
                println!("  -t, --tenant <ID>    Tenant to seed (default: tenant-dev)");
                println!("  -d, --db <PATH>      Database file path (default: ./checkout_dev.db)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Checkout Engine Seed Data Generator");
    println!("===================================");
    println!("Database: {}", db_path);
    println!("Tenant:   {}", tenant);
    println!("Stock:    {} per product", stock);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database, migrations applied");

    let existing = db.products().list(&tenant).await?;
    if !existing.is_empty() {
        println!("⚠ Tenant already has {} products, skipping.", existing.len());
        return Ok(());
    }

    let now = Utc::now();
    let mut inserted = 0;
    for (sku, name, price_cents) in CATALOG {
        validate_sku(sku)?;
        validate_product_name(name)?;
        validate_price_cents(*price_cents)?;

        let product = ProductStock {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant.clone(),
            sku: sku.to_string(),
            name: name.to_string(),
            stock_quantity: stock,
            price_cents: *price_cents,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = db.products().insert(&product).await {
            eprintln!("Failed to insert {}: {}", product.sku, e);
            continue;
        }
        println!("  {}  {}  ({})", product.id, product.sku, product.stock_quantity);
        inserted += 1;
    }

    println!();
    println!("✓ Seeded {} products", inserted);
    Ok(())
}
