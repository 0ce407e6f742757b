//! Broadcast example.
//!
//! Rank 0 broadcasts the numbers 0..100 and a mapping; every rank checks
//! what it got.
//!
//! Run with: FERROGROUP_STRICT_SYNC=1 cargo run --example broadcast

use ferrogroup::{local, Result, Value};

fn main() -> Result<()> {
    env_logger::init();

    local::run(4, |world| -> Result<()> {
        let rank = world.rank();

        let mut data = vec![0i64; 100];
        if rank == 0 {
            data = (0..100).collect();
        }
        world.broadcast(&mut data, 0)?;
        assert_eq!(data[99], 99, "broadcast failed on rank {rank}");

        let mut settings = Value::Unit;
        if rank == 0 {
            settings = Value::map([
                ("key1", Value::from("value1")),
                ("key2", Value::from(2.5)),
            ])?;
        }
        world.broadcast_value(&mut settings, 0)?;
        println!("Rank {rank}: sum {} settings {settings:?}", data.iter().sum::<i64>());
        Ok(())
    })?;
    Ok(())
}
