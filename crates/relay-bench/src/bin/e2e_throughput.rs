//! End-to-end throughput benchmark for the relay.
//!
//! Measures broadcast delivery with real network I/O. Every client both
//! sends and receives, so N clients see roughly N times the send rate.

use futures_util::{SinkExt, StreamExt};
use relay_protocol::WireMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8090/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
/// Pause between sends per client, so the hub is not simply saturated and
/// every client stays under its outbound queue bound.
const SEND_INTERVAL: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Relay End-to-End Throughput Benchmark               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_broadcast_benchmark(num_clients, url).await;
}

async fn run_broadcast_benchmark(num_clients: usize, url: String) {
    println!("📊 Broadcast Benchmark: {} clients on {}", num_clients, url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let sent = Arc::clone(&sent);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, sent, received, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counters and start measurement
    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_sent = sent.load(Ordering::SeqCst);
    let total_received = received.load(Ordering::SeqCst);

    let sent_per_sec = total_sent as f64 / elapsed.as_secs_f64();
    let delivered_per_sec = total_received as f64 / elapsed.as_secs_f64();
    let fan_out = if total_sent == 0 {
        0.0
    } else {
        total_received as f64 / total_sent as f64
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Messages Sent:        {:>10}                           ║",
        total_sent
    );
    println!(
        "║  Messages Delivered:   {:>10}                           ║",
        total_received
    );
    println!(
        "║  Send Rate:            {:>10.0} msg/s                    ║",
        sent_per_sec
    );
    println!(
        "║  Delivery Rate:        {:>10.0} msg/s                    ║",
        delivered_per_sec
    );
    println!(
        "║  Effective Fan-out:    {:>10.1}x                          ║",
        fan_out
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Signal clients to stop
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Connect to server
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for all clients to be ready
    barrier.wait().await;

    // Pre-encode the chat message for efficiency
    let chat = WireMessage::new("chat", "x".repeat(64), format!("bench-{client_id}"));
    let chat_msg = Message::Text(serde_json::to_string(&chat)?);

    // Spawn separate receiver task for full-duplex operation
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if serde_json::from_str::<WireMessage>(&text).is_ok() {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let mut ticker = tokio::time::interval(SEND_INTERVAL);
    loop {
        ticker.tick().await;
        if sender.send(chat_msg.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
    }

    recv_task.abort();
    Ok(())
}
