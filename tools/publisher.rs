//! Test Event Publisher
//!
//! Generates and publishes sample transaction events onto the inbound
//! stream for pipeline testing. Mixes clean traffic with sanctioned-country,
//! income-mismatch and gray-area events.

use fraud_triage_pipeline::types::event::{
    DeviceProfile, DocumentProfile, IpProfile, TransactionEvent, TransactionType, UserProfile,
};
use rand::Rng;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};

/// Sample event generator with a configurable share of risky traffic.
struct EventGenerator {
    rng: rand::rngs::ThreadRng,
    counter: u64,
}

impl EventGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            counter: 0,
        }
    }

    fn next_id(&mut self) -> (String, String) {
        self.counter += 1;
        let user = format!("USR-{:05}", self.rng.gen_range(1..500));
        (format!("TXN-{:012}", self.counter), user)
    }

    /// Ordinary traffic: low amount, clean profiles.
    fn generate_clean(&mut self) -> TransactionEvent {
        let (txn_id, user_id) = self.next_id();
        let amount = self.rng.gen_range(10.0..500.0);

        TransactionEvent::new(txn_id, user_id, self.random_type(), amount)
            .with_user_profile(UserProfile {
                declared_monthly_income: self.rng.gen_range(2_000.0..10_000.0),
                ..Default::default()
            })
            .with_ip_profile(IpProfile::default())
            .with_device_profile(DeviceProfile {
                total_users_count: 1,
                ..Default::default()
            })
            .with_document_profile(DocumentProfile {
                confidence_score: Some(self.rng.gen_range(0.85..1.0)),
                ..Default::default()
            })
    }

    /// Access from a sanctioned country: definitive block.
    fn generate_sanctioned(&mut self) -> TransactionEvent {
        let (txn_id, user_id) = self.next_id();

        TransactionEvent::new(txn_id, user_id, TransactionType::Deposit, 50.0).with_ip_profile(
            IpProfile {
                country_code: Some("IR".to_string()),
                sanctioned_country: true,
                ..Default::default()
            },
        )
    }

    /// Deposit far above declared income: definitive block.
    fn generate_income_mismatch(&mut self) -> TransactionEvent {
        let (txn_id, user_id) = self.next_id();
        let income = self.rng.gen_range(500.0..2_000.0);

        TransactionEvent::new(txn_id, user_id, TransactionType::Deposit, income * 20.0)
            .with_user_profile(UserProfile {
                declared_monthly_income: income,
                ..Default::default()
            })
    }

    /// VPN from a high-risk country on a shared device: gray area.
    fn generate_gray(&mut self) -> TransactionEvent {
        let (txn_id, user_id) = self.next_id();

        TransactionEvent::new(
            txn_id,
            user_id,
            TransactionType::Withdrawal,
            self.rng.gen_range(200.0..2_000.0),
        )
        .with_ip_profile(IpProfile {
            vpn: true,
            high_risk_country: true,
            ..Default::default()
        })
        .with_device_profile(DeviceProfile {
            total_users_count: self.rng.gen_range(6..15),
            ..Default::default()
        })
    }

    fn generate(&mut self, risky_rate: f64) -> TransactionEvent {
        if !self.rng.gen_bool(risky_rate) {
            return self.generate_clean();
        }
        match self.rng.gen_range(0..3) {
            0 => self.generate_sanctioned(),
            1 => self.generate_income_mismatch(),
            _ => self.generate_gray(),
        }
    }

    fn random_type(&mut self) -> TransactionType {
        match self.rng.gen_range(0..3) {
            0 => TransactionType::Deposit,
            1 => TransactionType::Withdrawal,
            _ => TransactionType::Trade,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("publisher=info".parse()?),
        )
        .init();

    info!("Starting Test Event Publisher");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let redis_url = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("redis://localhost:6379");
    let stream = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("deriv:transactions");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let risky_rate: f64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(0.2);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        redis_url = %redis_url,
        stream = %stream,
        count = count,
        risky_rate = risky_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    // Connect to Redis
    let mut conn = match redis::Client::open(redis_url) {
        Ok(client) => match redis::aio::ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("Connected to Redis");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to Redis. Running in dry-run mode.");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Invalid Redis URL. Running in dry-run mode.");
            None
        }
    };

    let mut generator = EventGenerator::new();
    info!("Publishing {} events...", count);

    for i in 0..count {
        let event = generator.generate(risky_rate);
        let event_json = serde_json::to_string(&event)?;

        match conn.as_mut() {
            Some(conn) => {
                let _: String = conn
                    .xadd(stream, "*", &[("event_data", event_json.as_str())])
                    .await?;
            }
            None => {
                if (i + 1) % 10 == 0 || i == 0 {
                    info!("Sample event {}:\n{}", i + 1, event_json);
                }
            }
        }

        if (i + 1) % 10 == 0 {
            info!("Published {}/{} events", i + 1, count);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!("Completed! Published {} events", count);
    Ok(())
}
