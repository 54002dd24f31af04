use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};

use auction_planner::calendar::localize;
use auction_planner::config::PlannerConfig;
use auction_planner::engine::Planner;
use auction_planner::model::{AuctionFamily, AuctionRef, AuctionPeriod, Tender};
use auction_planner::store::InMemoryStore;

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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn planner(store: Arc<InMemoryStore>) -> Arc<Planner> {
    let mut config = PlannerConfig {
        jitter_max_seconds: 0,
        ..PlannerConfig::default()
    };
    config.retry.max_attempts = 1000;
    Arc::new(Planner::new(store, config))
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

async fn phase1_sequential(planner: &Planner) {
    let tz = planner.config().tz;
    let earliest = localize(tz, first_day(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        planner
            .allocate(&AuctionRef::tender(format!("seq{i}")), AuctionFamily::Classic, "plan", earliest, false)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} allocations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("allocation latency", &mut latencies);
}

async fn phase2_contended(planner: Arc<Planner>) {
    let n_tasks = 20;
    let n_per_task = 50;
    let tz = planner.config().tz;
    let earliest = localize(tz, first_day(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let planner = planner.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let family = if j % 5 == 0 { AuctionFamily::Insider } else { AuctionFamily::Classic };
                let t = Instant::now();
                planner
                    .allocate(&AuctionRef::lot(format!("c{task}"), format!("l{j}")), family, "plancontended", earliest, false)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} allocations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("contended allocation latency", &mut all);
}

async fn phase3_reconcile_under_load(planner: Arc<Planner>) {
    let tz = planner.config().tz;
    let earliest = localize(tz, first_day(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());

    // Writers keep allocating in their own domain
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let planner = planner.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let _ = planner
                    .allocate(&AuctionRef::tender(format!("w{w}x{i}")), AuctionFamily::Classic, "planload", earliest, false)
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let per_reader = 100;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let planner = planner.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(per_reader);
            for i in 0..per_reader {
                let id = format!("r{r}x{i}");
                planner
                    .allocate(&AuctionRef::tender(id.as_str()), AuctionFamily::Classic, "planreconcile", earliest, false)
                    .await
                    .unwrap();
                // the tender moved away: its slot is freed
                let tender = Tender {
                    id,
                    auction_period: Some(AuctionPeriod::default()),
                    ..Tender::default()
                };
                let t = Instant::now();
                planner.reconcile(&tender).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in reader_handles {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("reconcile latency", &mut all);
}

async fn phase4_journal(dir: &std::path::Path) {
    let path = dir.join("stress.wal");
    let _ = std::fs::remove_file(&path);
    let store = Arc::new(InMemoryStore::open(&path).unwrap());
    let planner = planner(store.clone());
    let tz = planner.config().tz;
    let earliest = localize(tz, first_day(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());

    let n_tasks = 10;
    let n_per_task = 100;
    let ok = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let planner = planner.clone();
        let ok = ok.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                if planner
                    .allocate(&AuctionRef::tender(format!("j{task}x{j}")), AuctionFamily::Texas, "plan", earliest, false)
                    .await
                    .is_ok()
                {
                    ok.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }
    let elapsed = start.elapsed();
    println!(
        "  {} journaled allocations in {:.2}s",
        ok.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );

    let t = Instant::now();
    store.compact().await.unwrap();
    println!("  compaction of {} documents in {:.2}ms", store.len(), t.elapsed().as_secs_f64() * 1000.0);
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join("auction_planner_stress");
    std::fs::create_dir_all(&dir).unwrap();

    println!("=== auction planner stress benchmark ===\n");

    println!("[phase 1] sequential allocation throughput");
    phase1_sequential(&planner(Arc::new(InMemoryStore::new()))).await;

    println!("\n[phase 2] contended allocation on shared days");
    phase2_contended(planner(Arc::new(InMemoryStore::new()))).await;

    println!("\n[phase 3] reconcile latency under allocation load");
    phase3_reconcile_under_load(planner(Arc::new(InMemoryStore::new()))).await;

    println!("\n[phase 4] journaled allocation and compaction");
    phase4_journal(&dir).await;

    println!("\n=== done ===");
}
