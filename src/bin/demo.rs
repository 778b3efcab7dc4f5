//! Demonstrates the driver under load: many timeouts with deadlines spread
//! across a 1-10s window, fired for real by a live driver thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hierarchical_timing_wheel::TimerDriver;

fn main() {
    env_logger::init();

    println!("Starting timing wheel driver simulation...");

    let driver = Arc::new(TimerDriver::build(Duration::from_millis(10), 256, None).unwrap());
    driver.start();

    let num_timers = 20_000;
    let fired = Arc::new(AtomicUsize::new(0));

    println!("-> Scheduling {num_timers} timers...");
    let start_insert = Instant::now();

    for i in 0..num_timers {
        let deadline_ms = (i % 10_000) as i64 + 1;
        let fired = fired.clone();
        driver.add_task(deadline_ms, move || {
            fired.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }

    let insert_time = start_insert.elapsed();
    println!("   Scheduled {num_timers} timers in {insert_time:?}");

    println!("\n-> Waiting for timers to fire...");
    let start_wait = Instant::now();
    while fired.load(Ordering::Relaxed) < num_timers {
        std::thread::sleep(Duration::from_millis(50));
    }
    let wait_time = start_wait.elapsed();

    println!("   All {num_timers} timers fired in {wait_time:?}");
    println!("   Remaining task_count: {}", driver.task_count());

    driver.stop();
    println!("\nSUCCESS: the wheel handled the load.");
}
