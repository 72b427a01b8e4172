//! # Repository Module
//!
//! Database repository implementations for the checkout engine.
//!
//! ## Two Kinds of Methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  &self methods            run on their own pooled connection            │
//! │  ─────────────            (lookups, outbox, sweeper batch)              │
//! │                                                                         │
//! │  Repo::xxx_in(conn, ..)   run on the caller's transaction               │
//! │  ──────────────────────   (everything that must commit atomically       │
//! │                            with a stock lock held)                      │
//! │                                                                         │
//! │  checkout-engine decides which transaction a statement belongs to;      │
//! │  repositories never begin or commit.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Stock ledger and row locks
//! - [`OrderRepository`](order::OrderRepository) - Orders, items, status CAS
//! - [`ReservationRepository`](reservation::ReservationRepository) - Holds
//! - [`PaymentRepository`](payment::PaymentRepository) - Charges, notification claims
//! - [`OutboxRepository`](outbox::OutboxRepository) - Event queue

pub mod order;
pub mod outbox;
pub mod payment;
pub mod product;
pub mod reservation;
