//! Transaction example
//!
//! This example demonstrates:
//! - Building queries with the `sql!` macro
//! - Transferring money in a SERIALIZABLE transaction that is rerun on conflicts
//! - Commit and rollback hooks
//! - Streaming rows with `iterate`
//!
//! Run with: PGHOST=... PGUSER=... PGDATABASE=... cargo run --example transactions

use futures_util::StreamExt;
use rust_pg_access::prelude::*;
use rust_pg_access::sql;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Rust PG Access - Transaction Example ===\n");

    let db = PgDatabase::postgres(&PgConfig::from_env().with_option("statement_timeout", "10s"))?;

    println!("1. Creating table...");
    db.run("DROP TABLE IF EXISTS demo_accounts").await?;
    db.run(
        "CREATE TABLE demo_accounts (
            id INT PRIMARY KEY,
            owner TEXT NOT NULL,
            balance NUMERIC NOT NULL CHECK (balance >= 0)
        )",
    )
    .await?;
    for (id, owner, balance) in [(1, "alice", 1000), (2, "bob", 250)] {
        db.run(sql!(
            "INSERT INTO demo_accounts (id, owner, balance) VALUES ",
            SqlValue::array([SqlValue::from(id), SqlValue::from(owner), SqlValue::from(balance)]),
            ""
        )?)
        .await?;
    }
    println!("   ✓ Table created\n");

    println!("2. Transferring 300 from alice to bob...");
    let balance = transfer(&db, 1, 2, 300).await?;
    println!("   ✓ bob now has {balance:?}\n");

    println!("3. Attempting an overdraft...");
    let commits = Arc::new(AtomicUsize::new(0));
    let rollbacks = Arc::new(AtomicUsize::new(0));
    let hooks = {
        let commits = Arc::clone(&commits);
        let rollbacks = Arc::clone(&rollbacks);
        TransactionHooks::new()
            .on_commit(move || {
                commits.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            })
            .on_rollback(move || {
                rollbacks.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            })
    };
    let overdraft = db
        .transaction(Some(IsolationLevel::Serializable), hooks, |tx| {
            Box::pin(async move {
                tx.run(sql!(
                    "UPDATE demo_accounts SET balance = balance - ",
                    5000,
                    " WHERE ",
                    SqlValue::where_group([("id", 2)]),
                    ""
                )?)
                .await
            })
        })
        .await;
    match overdraft {
        Ok(_) => println!("   ✗ Overdraft unexpectedly committed"),
        Err(e) => println!(
            "   ✓ Rejected with SQLSTATE {}: {e}",
            e.code().unwrap_or("none")
        ),
    }
    // 23514 is retriable, so the rollback hook runs once per attempt
    println!(
        "   commits: {}, rollbacks: {}\n",
        commits.load(Ordering::SeqCst),
        rollbacks.load(Ordering::SeqCst)
    );

    println!("4. Streaming accounts...");
    let mut rows = db.iterate("SELECT owner, balance FROM demo_accounts ORDER BY id").await?;
    while let Some(row) = rows.next().await {
        let row = row?;
        println!("   {:?}: {:?}", row.get("owner"), row.get("balance"));
    }

    db.run("DROP TABLE demo_accounts").await?;
    db.end().await;
    println!("\n=== Example completed successfully ===");
    Ok(())
}

async fn transfer(db: &PgDatabase, from: i32, to: i32, amount: i64) -> Result<Option<SqlValue>> {
    db.serial(move |tx| {
        Box::pin(async move {
            tx.run(sql!(
                "UPDATE demo_accounts SET balance = balance - ",
                amount,
                " WHERE ",
                SqlValue::where_group([("id", from)]),
                ""
            )?)
            .await?;
            tx.run(sql!(
                "UPDATE demo_accounts SET balance = balance + ",
                amount,
                " WHERE ",
                SqlValue::where_group([("id", to)]),
                ""
            )?)
            .await?;
            tx.value(sql!("SELECT balance FROM demo_accounts WHERE id = ", to, "")?)
                .await
        })
    })
    .await
}
