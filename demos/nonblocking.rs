//! Nonblocking point-to-point example.
//!
//! Rank 0 posts an isend, rank 1 an irecv; both wait before using the data.
//!
//! Run with: cargo run --example nonblocking

use ferrogroup::{local, Request, Result, Value};

fn main() -> Result<()> {
    env_logger::init();

    local::run(4, |world| -> Result<()> {
        let rank = world.rank();
        let size = world.size();

        // ============================================================
        // Test 1: single exchange
        // ============================================================
        if rank == 0 {
            let data = Value::map([("a", Value::Int(7)), ("b", Value::Float(3.5))])?;
            let mut req = world.isend_value(&data, 1, 11)?;
            req.wait()?;
        } else if rank == 1 {
            let mut req = world.irecv_value::<Value>(0, 11)?;

            // Simulate some computation while the message is in flight
            let mut compute_result = 0.0;
            for i in 0..1000 {
                compute_result += (i as f64).sin();
            }

            let data = req.wait()?;
            println!("Rank {rank}: received {data:?} (computed {compute_result:.3})");
        }

        world.barrier()?;

        // ============================================================
        // Test 2: everybody reports to rank 0
        // ============================================================
        if rank == 0 {
            let requests = (1..size)
                .map(|src| world.irecv::<i32>(2, src, 0))
                .collect::<Result<Vec<_>>>()?;
            for (src, pair) in (1..size).zip(Request::wait_all(requests)?) {
                println!("  from rank {src}: {pair:?}");
            }
        } else {
            let mut req = world.isend(&[rank, rank * rank], 0, 0)?;
            req.wait()?;
        }
        Ok(())
    })?;
    Ok(())
}
