use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const SLOT_MS: i64 = 15 * 60_000;
/// 2025-01-01T00:00:00Z
const BASE_MS: i64 = 1_735_689_600_000;

async fn connect(host: &str, port: u16, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(db)
        .user("seatline")
        .password("seatline");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_tenant() -> String {
    format!("bench_{}", Ulid::new())
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

/// An always-open UTC restaurant with one sector of `tables` two-to-four tops.
async fn setup(client: &tokio_postgres::Client, tables: usize) {
    client
        .batch_execute("INSERT INTO restaurants VALUES ('R1', 'Bench Bistro', 'UTC', NULL)")
        .await
        .unwrap();
    client
        .batch_execute("INSERT INTO sectors VALUES ('S1', 'R1', 'Main')")
        .await
        .unwrap();
    for t in 0..tables {
        client
            .batch_execute(&format!(
                "INSERT INTO tables VALUES ('T{t:03}', 'S1', 'Table {t}', 2, 4)"
            ))
            .await
            .unwrap();
    }
}

fn slot_start(slot: i64) -> String {
    DateTime::from_timestamp_millis(BASE_MS + slot * SLOT_MS)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn book_sql(key: &str, slot: i64, guest: &str) -> String {
    format!(
        "INSERT INTO reservations VALUES ('{key}', 'R1', 'S1', 2, '{}', '{guest}', '555-{guest}', '{guest}@bench.test', NULL)",
        slot_start(slot)
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_tenant()).await;
    setup(&client, 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .simple_query(&book_sql(&format!("seq-{i}"), i as i64, &format!("g{i}")))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

/// Many clients race for the same slots. Each slot must end with exactly
/// one reservation per table and the rest refused.
async fn phase2_contention(host: &str, port: u16) {
    let tables = 4;
    let n_tasks = 16;
    let n_slots = 50;
    let db = fresh_tenant();
    let setup_client = connect(host, port, &db).await;
    setup(&setup_client, tables).await;

    let booked = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for task in 0..n_tasks {
        let host = host.to_string();
        let db = db.clone();
        let booked = booked.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            // Slots 8 apart never overlap a 90-minute reservation.
            for s in 0..n_slots {
                let sql = book_sql(&format!("c-{task}-{s}"), s * 8, &format!("t{task}"));
                match client.simple_query(&sql).await {
                    Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(_) => refused.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots as usize;
    let ok = booked.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} clients x {n_slots} slots = {total} requests in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  booked {ok}, refused {} (expected {} booked)",
        refused.load(Ordering::Relaxed),
        tables * n_slots as usize
    );
    assert_eq!(ok, tables * n_slots as usize, "over- or under-allocation");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let db = fresh_tenant();
    let setup_client = connect(host, port, &db).await;
    setup(&setup_client, 20).await;
    for i in 0..200 {
        setup_client
            .simple_query(&book_sql(&format!("pre-{i}"), i, &format!("p{i}")))
            .await
            .unwrap();
    }
    drop(setup_client);

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let db = db.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let slot = 1_000 + w * 100_000 + i;
                let _ = client
                    .simple_query(&book_sql(&format!("w-{w}-{i}"), slot, &format!("w{w}")))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let host = host.to_string();
        let db = db.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &db).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(
                        "SELECT * FROM availability WHERE restaurant_id = 'R1' AND sector_id = 'S1' AND date = '2025-01-01' AND party_size = 2",
                    )
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &fresh_tenant()).await;
            setup(&client, 2).await;
            for i in 0..ops_per_conn {
                client
                    .simple_query(&book_sql(&format!("s-{i}"), i * 8, "storm"))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SEATLINE_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SEATLINE_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SEATLINE_PORT");

    println!("=== seatline stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended slots");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] availability latency under booking load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
