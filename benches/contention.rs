use std::sync::Arc;
use std::time::{Duration, Instant};

use seatledger::engine::{ErrorKind, Ledger, LedgerSettings, LedgerStore};
use seatledger::model::{Event, Identity, TicketTier};
use seatledger::notify::NotifyHub;
use seatledger::pricing::Money;
use seatledger::seatmap::SeatId;
use ulid::Ulid;

const ROWS: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "J", "K"];
const SEATS_PER_ROW: u16 = 50;

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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn arena(id: &str) -> Event {
    Event::new(
        id,
        "Arena",
        vec![
            TicketTier::new("Floor", Money::from_minor(9000), &ROWS[..4]),
            TicketTier::new("Stand", Money::from_minor(4500), &ROWS[4..]),
        ],
    )
    .with_seats_per_row(SEATS_PER_ROW)
}

fn tier_for(row: &str) -> &'static str {
    if ROWS[..4].contains(&row) { "Floor" } else { "Stand" }
}

async fn setup(durable: bool, events: usize) -> (Arc<Ledger>, Vec<String>) {
    let store = if durable {
        let dir = std::env::temp_dir().join(format!("seatledger_bench_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        LedgerStore::open(&dir.join("seatledger.wal")).unwrap()
    } else {
        LedgerStore::in_memory()
    };
    let ledger = Arc::new(Ledger::new(
        Arc::new(store),
        Arc::new(NotifyHub::new()),
        LedgerSettings::default(),
    ));
    let admin = Identity::admin("bench-admin");
    let mut ids = Vec::new();
    for i in 0..events {
        let id = format!("arena-{i}");
        ledger.publish_event(&admin, arena(&id)).await.unwrap();
        ids.push(id);
    }
    (ledger, ids)
}

async fn phase1_sequential(ledger: &Ledger, event_id: &str) {
    let mut latencies = Vec::new();
    let start = Instant::now();
    for row in ROWS {
        for number in 1..=SEATS_PER_ROW {
            let user = Identity::user(format!("fan-{row}{number}"));
            let t = Instant::now();
            ledger
                .reserve(&user, event_id, tier_for(row), vec![SeatId::new(row, number)])
                .await
                .unwrap();
            latencies.push(t.elapsed());
        }
    }
    let elapsed = start.elapsed();
    let ops = latencies.len() as f64 / elapsed.as_secs_f64();
    println!("  {} reserves in {:.2}s = {ops:.0} ops/sec", latencies.len(), elapsed.as_secs_f64());
    print_latency("reserve", &mut latencies);
}

async fn phase2_hot_seat(ledger: Arc<Ledger>, event_id: &str) {
    let n_tasks = 200;
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..n_tasks {
        let ledger = ledger.clone();
        let event_id = event_id.to_string();
        handles.push(tokio::spawn(async move {
            let user = Identity::user(format!("rush-{i}"));
            let t = Instant::now();
            let result = ledger
                .reserve(&user, &event_id, "Floor", vec![SeatId::new("A", 1), SeatId::new("A", 2)])
                .await;
            (t.elapsed(), result.map_err(|e| e.kind()))
        }));
    }

    let mut latencies = Vec::new();
    let (mut won, mut lost, mut other) = (0, 0, 0);
    for h in handles {
        let (latency, result) = h.await.unwrap();
        latencies.push(latency);
        match result {
            Ok(_) => won += 1,
            Err(ErrorKind::SeatUnavailable) => lost += 1,
            Err(_) => other += 1,
        }
    }
    println!(
        "  {n_tasks} racers for A1+A2 in {:.2}s: {won} won, {lost} unavailable, {other} other",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, 1, "exactly one racer may win the hot seats");
    print_latency("contended reserve", &mut latencies);
}

async fn phase3_parallel_events(ledger: Arc<Ledger>, event_ids: &[String]) {
    let start = Instant::now();
    let mut handles = Vec::new();
    for event_id in event_ids {
        let ledger = ledger.clone();
        let event_id = event_id.clone();
        handles.push(tokio::spawn(async move {
            let mut booked = 0;
            for number in 1..=SEATS_PER_ROW {
                let user = Identity::user(format!("{event_id}-fan-{number}"));
                if ledger
                    .reserve(&user, &event_id, "Stand", vec![SeatId::new("E", number)])
                    .await
                    .is_ok()
                {
                    booked += 1;
                }
            }
            booked
        }));
    }
    let mut total = 0;
    for h in handles {
        total += h.await.unwrap();
    }
    let elapsed = start.elapsed();
    println!(
        "  {} events x {SEATS_PER_ROW} reserves = {total} in {:.2}s = {:.0} ops/sec",
        event_ids.len(),
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase4_reads_under_load(ledger: Arc<Ledger>, event_id: &str) {
    let writer = {
        let ledger = ledger.clone();
        let event_id = event_id.to_string();
        tokio::spawn(async move {
            for number in 1..=SEATS_PER_ROW {
                let user = Identity::user(format!("late-{number}"));
                let _ = ledger
                    .reserve(&user, &event_id, "Stand", vec![SeatId::new("K", number)])
                    .await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        ledger.free_seats(event_id).await.unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("free_seats", &mut latencies);
}

#[tokio::main]
async fn main() {
    let durable = std::env::var("SEATLEDGER_BENCH_DURABLE").is_ok_and(|v| v != "0");

    println!("=== seatledger contention benchmark ===");
    println!("store: {}\n", if durable { "WAL" } else { "in-memory" });

    println!("[setup]");
    let (ledger, event_ids) = setup(durable, 8).await;
    println!("  published {} events of {} seats", event_ids.len(), ROWS.len() * SEATS_PER_ROW as usize);

    println!("\n[phase 1] sequential reserve throughput");
    phase1_sequential(&ledger, &event_ids[0]).await;

    println!("\n[phase 2] hot seat race");
    phase2_hot_seat(ledger.clone(), &event_ids[1]).await;

    println!("\n[phase 3] independent events in parallel");
    phase3_parallel_events(ledger.clone(), &event_ids[2..]).await;

    println!("\n[phase 4] read latency under write load");
    phase4_reads_under_load(ledger.clone(), &event_ids[1]).await;

    println!("\n=== benchmark complete ===");
}
