use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, TimeZone, Utc};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const SLOT: i64 = 30 * 60_000; // 30 minutes in ms

/// Local midnight, 2030-01-01, at the server's default offset (UTC-3).
fn base_ms() -> i64 {
    let utc = NaiveDate::from_ymd_opt(2030, 1, 1)
        .expect("valid date")
        .and_hms_opt(3, 0, 0)
        .expect("valid time");
    Utc.from_utc_datetime(&utc).timestamp_millis()
}

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("fairslot")
        .password("fairslot");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
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

/// A salesperson open around the clock, every day of the week.
async fn open_salesperson(client: &tokio_postgres::Client, share: u32) -> Ulid {
    let sp = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO salespeople (id, name, share) VALUES ('{sp}', 'bench', {share})"
        ))
        .await
        .unwrap();
    for weekday in 0..7 {
        let rule_id = Ulid::new();
        client
            .batch_execute(&format!(
                r#"INSERT INTO weekly_rules (id, salesperson_id, weekday, start, "end") VALUES ('{rule_id}', '{sp}', {weekday}, '00:00', '24:00')"#
            ))
            .await
            .unwrap();
    }
    sp
}

fn booking_sql(sp: &str, slot: i64) -> String {
    format!(
        "INSERT INTO appointments (id, salesperson_id, lead_id, scheduled_at) VALUES ('{}', {sp}, 'lead-{slot}', {})",
        Ulid::new(),
        base_ms() + slot * SLOT
    )
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let sp = open_salesperson(&client, 100).await;
    let sp = format!("'{sp}'");

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client.batch_execute(&booking_sql(&sp, i as i64)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many clients race for the same instants; exactly one may win each.
async fn phase2_contention(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &dbname).await;
    let sp = open_salesperson(&setup, 100).await;
    drop(setup);

    let n_tasks = 16;
    let n_slots = 200;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let dbname = dbname.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &dbname).await;
            let sp = format!("'{sp}'");
            for slot in 0..n_slots {
                match client.batch_execute(&booking_sql(&sp, slot)).await {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {won} booked, {lost} rejected",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "every instant must be booked exactly once");
}

/// Free-slot queries while writers keep booking on the same calendar.
async fn phase3_read_under_load(host: &str, port: u16) {
    let dbname = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &dbname).await;
    let sp = open_salesperson(&setup, 100).await;
    drop(setup);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..4i64 {
        let host = host.to_string();
        let dbname = dbname.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &dbname).await;
            let sp = format!("'{sp}'");
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&booking_sql(&sp, w * 100_000 + i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let dbname = dbname.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &dbname).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let day = NaiveDate::from_ymd_opt(2030, 1, 1)
                    .expect("valid date")
                    .checked_add_days(chrono::Days::new(((r + i) % 30) as u64))
                    .expect("valid date");
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM free_slots WHERE salesperson_id = '{sp}' AND day = '{day}'"
                    ))
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

    print_latency("free_slots query", &mut all_latencies);
}

/// Unassigned bookings routed by the allocator across a 70/30 roster.
async fn phase4_routing(host: &str, port: u16) {
    let client = connect(host, port, &format!("bench_{}", Ulid::new())).await;
    let a = open_salesperson(&client, 70).await;
    let b = open_salesperson(&client, 30).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let t = Instant::now();
        client.batch_execute(&booking_sql("NULL", i as i64)).await.unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("routed booking", &mut latencies);

    for (label, sp) in [("70%", a), ("30%", b)] {
        let rows = client
            .simple_query(&format!("SELECT * FROM appointments WHERE salesperson_id = '{sp}'"))
            .await
            .unwrap();
        let count = rows
            .iter()
            .filter(|m| matches!(m, tokio_postgres::SimpleQueryMessage::Row(_)))
            .count();
        println!("  {label} salesperson received {count}/{n}");
    }
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &format!("bench_{}", Ulid::new())).await;
            let sp = open_salesperson(&client, 100).await;
            let sp = format!("'{sp}'");
            for i in 0..ops_per_conn {
                client.batch_execute(&booking_sql(&sp, i)).await.unwrap();
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
    let host = std::env::var("FAIRSLOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("FAIRSLOT_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid FAIRSLOT_PORT");

    println!("=== fairslot stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own organisation (unique dbname).

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended bookings on shared instants");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] free-slot latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] allocator routing");
    phase4_routing(&host, port).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== done ===");
}
