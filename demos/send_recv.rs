//! Point-to-point example.
//!
//! Rank 0 sends a small mapping to rank 1 with tag 11, then a typed buffer
//! of 1000 doubles with tag 77.
//!
//! Run with: cargo run --example send_recv

use ferrogroup::{local, Result, Value};

fn main() -> Result<()> {
    env_logger::init();

    local::run(2, |world| -> Result<()> {
        let rank = world.rank();

        // ============================================================
        // Generic value
        // ============================================================
        if rank == 0 {
            let data = Value::map([("a", Value::Int(7)), ("b", Value::Float(3.5))])?;
            world.send_value(&data, 1, 11)?;
        } else {
            let data: Value = world.recv_value(0, 11)?;
            println!("Rank {rank}: received {data:?}");
        }

        // ============================================================
        // Typed buffer
        // ============================================================
        let mut buf = vec![0.0f64; 1000];
        if rank == 0 {
            for (i, x) in buf.iter_mut().enumerate() {
                *x = i as f64;
            }
            world.send(&buf, 1, 77)?;
        } else {
            let status = world.recv(&mut buf, 0, 77)?;
            println!(
                "Rank {rank}: {} elements from rank {}, first {:?}",
                status.count,
                status.source,
                &buf[..5]
            );
        }
        Ok(())
    })?;
    Ok(())
}
