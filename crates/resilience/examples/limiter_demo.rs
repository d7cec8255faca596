// crates/resilience/examples/limiter_demo.rs
//! Demonstration of the two admission strategies

use std::time::{Duration, Instant};
use steadyline_resilience::{CancellationToken, RateBudget, RetryPolicy};

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("Rate Limiter Demo");
    println!("=================\n");

    let budgets = [
        RateBudget::TokenBucket {
            rate_per_second: 4.0,
            burst: 2,
        },
        RateBudget::SlidingWindow {
            window: Duration::from_secs(2),
            sub_interval: Duration::from_millis(500),
            capacity: 4,
        },
    ];

    for budget in budgets {
        println!("{:?}", budget);
        let limiter = match budget.build() {
            Ok(limiter) => limiter,
            Err(e) => {
                println!("  invalid budget: {}", e);
                continue;
            }
        };

        let cancel = CancellationToken::new();
        let start = Instant::now();
        for i in 1..=8 {
            if let Err(e) = limiter.wait(&cancel).await {
                println!("  wait failed: {}", e);
                break;
            }
            println!("  admitted #{} at {:?}", i, start.elapsed());
        }
        limiter.shutdown();
        println!();
    }

    println!("Retry schedule");
    let policy = RetryPolicy::default().with_min_delay(Duration::from_millis(250));
    for attempt in 1..=policy.max_retries() {
        println!("  retry {} after {:?}", attempt, policy.delay_for_attempt(attempt));
    }
}
